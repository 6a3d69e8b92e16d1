//! HTTP control-panel façade in front of the server instance.
//!
//! The panel declares its routes up front and closes over the instance's
//! deferred public address. Handlers only become callable once the address
//! has resolved, which [`ControlPanel::bind`] enforces. Every declared route
//! currently answers with the same status payload; `/start` and `/stop` do
//! not drive the instance lifecycle.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::output::{AttributeStore, Output, ResolveError};

/// Paths declared by the panel, in declaration order.
pub const ROUTE_PATHS: [&str; 3] = ["/", "/start", "/stop"];

/// HTTP method accepted by a route.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `DELETE`
    Delete,
}

impl Method {
    /// Upper-case method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared route.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Request path, starting with `/`.
    pub path: String,
    /// Accepted method.
    pub method: Method,
}

/// Request handed to a bound panel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PanelRequest {
    /// Request method.
    pub method: Method,
    /// Request path.
    pub path: String,
}

impl PanelRequest {
    /// `GET` request for `path`.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
        }
    }
}

/// Plaintext response produced by a handler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PanelResponse {
    /// HTTP status code.
    pub status: u16,
    /// Plaintext body.
    pub body: String,
}

impl PanelResponse {
    const fn new(status: u16, body: String) -> Self {
        Self { status, body }
    }
}

/// Status payload embedding the server address.
#[must_use]
pub fn status_body(server_address: &str) -> String {
    format!("Hello from Minecraft Control Panel API!\n\nServer IP: {server_address}\n")
}

/// Declared control panel whose handlers read a deferred address.
#[derive(Clone, Debug)]
pub struct ControlPanel {
    routes: Vec<Route>,
    server_address: Output<String>,
}

impl ControlPanel {
    /// Declares the status, start, and stop routes over `server_address`.
    #[must_use]
    pub fn new(server_address: Output<String>) -> Self {
        let routes = ROUTE_PATHS
            .iter()
            .map(|path| Route {
                path: (*path).to_owned(),
                method: Method::Get,
            })
            .collect();
        Self {
            routes,
            server_address,
        }
    }

    /// Declared routes.
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Deferred address the handlers report.
    #[must_use]
    pub const fn server_address(&self) -> &Output<String> {
        &self.server_address
    }

    /// Route table as a descriptor property.
    #[must_use]
    pub fn route_table(&self) -> Value {
        json!(self.routes)
    }

    /// Resolves the address and returns callable handlers.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the instance address has not resolved.
    pub fn bind(&self, store: &AttributeStore) -> Result<BoundControlPanel, ResolveError> {
        Ok(BoundControlPanel {
            routes: self.routes.clone(),
            server_address: self.server_address.resolve(store)?,
        })
    }
}

/// Control panel with a resolved address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BoundControlPanel {
    routes: Vec<Route>,
    server_address: String,
}

impl BoundControlPanel {
    /// Resolved server address.
    #[must_use]
    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    /// Declared routes.
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Handles one request. Handlers hold no state and have no side effects.
    pub fn handle<'a>(
        &'a self,
        request: &'a PanelRequest,
    ) -> impl Future<Output = PanelResponse> + Send + 'a {
        async move { self.respond(request) }
    }

    fn respond(&self, request: &PanelRequest) -> PanelResponse {
        let mut known_path = false;
        for route in &self.routes {
            if route.path != request.path {
                continue;
            }
            known_path = true;
            if route.method == request.method {
                return PanelResponse::new(200, status_body(&self.server_address));
            }
        }
        if known_path {
            PanelResponse::new(405, format!("method {} not allowed\n", request.method))
        } else {
            PanelResponse::new(404, format!("no route for {}\n", request.path))
        }
    }
}
