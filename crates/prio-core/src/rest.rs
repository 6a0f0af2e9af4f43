//! REST mapping for the persistence gateway.
//!
//! [`RestGateway`] turns each gateway call into one HTTP request and maps the
//! response back: any 2xx is success, any other status is a server error, and
//! a transport failure is a network error. The HTTP client itself is supplied
//! by the caller through [`HttpTransport`].

use futures::future::{FutureExt, LocalBoxFuture};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::gateway::{GatewayFuture, GatewayRequest, PersistenceGateway};
use crate::model::{ItemId, ListName};

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Everything but RFC 3986 unreserved characters is escaped in a path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// URL templates for the three calls. `{list}` and `{item}` are substituted
/// as percent-encoded path segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestRoutes {
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_persist_order")]
    pub persist_order: String,
    #[serde(default = "default_membership")]
    pub add_membership: String,
    #[serde(default = "default_membership")]
    pub remove_membership: String,
    /// JSON field carrying the ordered ids in a `persist_order` body.
    #[serde(default = "default_ids_field")]
    pub ids_field: String,
}

impl Default for RestRoutes {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            persist_order: default_persist_order(),
            add_membership: default_membership(),
            remove_membership: default_membership(),
            ids_field: default_ids_field(),
        }
    }
}

fn default_persist_order() -> String {
    "/lists/{list}/order".to_string()
}

fn default_membership() -> String {
    "/lists/{list}/items/{item}".to_string()
}

fn default_ids_field() -> String {
    "ids".to_string()
}

impl RestRoutes {
    fn expand(&self, template: &str, list: &ListName, item: Option<&ItemId>) -> String {
        let segment = |raw: &str| utf8_percent_encode(raw, SEGMENT).to_string();
        let mut path = template.replace("{list}", &segment(list.as_str()));
        if let Some(item) = item {
            path = path.replace("{item}", &segment(item.as_str()));
        }
        format!("{}{path}", self.base_url)
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// The request never produced a response (connection refused, timeout, ...).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

pub type TransportFuture = LocalBoxFuture<'static, Result<HttpResponse, TransportError>>;

/// Minimal HTTP client seam.
pub trait HttpTransport {
    fn send(&self, request: HttpRequest) -> TransportFuture;
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

pub struct RestGateway<T> {
    transport: T,
    routes: RestRoutes,
}

impl<T: HttpTransport> RestGateway<T> {
    #[must_use]
    pub const fn new(transport: T, routes: RestRoutes) -> Self {
        Self { transport, routes }
    }

    #[must_use]
    pub const fn routes(&self) -> &RestRoutes {
        &self.routes
    }

    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// HTTP form of a gateway request.
    #[must_use]
    pub fn build_request(&self, request: &GatewayRequest) -> HttpRequest {
        match request {
            GatewayRequest::PersistOrder { list, ids } => {
                let mut body = serde_json::Map::new();
                let ids = ids
                    .iter()
                    .map(|id| serde_json::Value::String(id.to_string()))
                    .collect();
                body.insert(self.routes.ids_field.clone(), serde_json::Value::Array(ids));
                HttpRequest {
                    method: HttpMethod::Post,
                    url: self.routes.expand(&self.routes.persist_order, list, None),
                    body: Some(serde_json::Value::Object(body)),
                }
            }
            GatewayRequest::AddMembership { item, list } => HttpRequest {
                method: HttpMethod::Post,
                url: self.routes.expand(&self.routes.add_membership, list, Some(item)),
                body: None,
            },
            GatewayRequest::RemoveMembership { item, list } => HttpRequest {
                method: HttpMethod::Delete,
                url: self
                    .routes
                    .expand(&self.routes.remove_membership, list, Some(item)),
                body: None,
            },
        }
    }

    fn call(&self, request: &GatewayRequest) -> GatewayFuture {
        let http = self.build_request(request);
        tracing::debug!(method = ?http.method, url = %http.url, "sending persistence request");
        let response = self.transport.send(http);
        async move {
            match response.await {
                Ok(response) if (200..300).contains(&response.status) => Ok(()),
                Ok(response) => Err(GatewayError::Server {
                    status: response.status,
                    body: response.body,
                }),
                Err(err) => Err(GatewayError::Network(err.0)),
            }
        }
        .boxed_local()
    }
}

impl<T: HttpTransport> PersistenceGateway for RestGateway<T> {
    fn persist_order(&self, list: &ListName, ordered_ids: &[ItemId]) -> GatewayFuture {
        self.call(&GatewayRequest::PersistOrder {
            list: list.clone(),
            ids: ordered_ids.to_vec(),
        })
    }

    fn add_membership(&self, item: &ItemId, target: &ListName) -> GatewayFuture {
        self.call(&GatewayRequest::AddMembership {
            item: item.clone(),
            list: target.clone(),
        })
    }

    fn remove_membership(&self, item: &ItemId, source: &ListName) -> GatewayFuture {
        self.call(&GatewayRequest::RemoveMembership {
            item: item.clone(),
            list: source.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::future;
    use serde_json::json;
    use std::cell::RefCell;

    struct CannedTransport {
        reply: Result<HttpResponse, TransportError>,
        sent: RefCell<Vec<HttpRequest>>,
    }

    impl CannedTransport {
        fn status(status: u16, body: &str) -> Self {
            Self {
                reply: Ok(HttpResponse {
                    status,
                    body: body.to_string(),
                }),
                sent: RefCell::new(Vec::new()),
            }
        }
    }

    impl HttpTransport for CannedTransport {
        fn send(&self, request: HttpRequest) -> TransportFuture {
            self.sent.borrow_mut().push(request);
            future::ready(self.reply.clone()).boxed_local()
        }
    }

    fn label_routes() -> RestRoutes {
        RestRoutes {
            base_url: "https://git.example.com/group/project".into(),
            persist_order: "/labels/set_priorities".into(),
            remove_membership: "/labels/{item}/remove_priority".into(),
            ids_field: "label_ids".into(),
            ..RestRoutes::default()
        }
    }

    #[test]
    fn persist_order_posts_ids_under_configured_field() {
        let gateway = RestGateway::new(CannedTransport::status(200, ""), label_routes());
        let ids = [ItemId::from(3_u64), ItemId::from(1_u64)];
        block_on(gateway.persist_order(&ListName::from("prioritized"), &ids)).expect("ok");

        let sent = gateway.transport().sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, HttpMethod::Post);
        assert_eq!(
            sent[0].url,
            "https://git.example.com/group/project/labels/set_priorities"
        );
        assert_eq!(sent[0].body, Some(json!({ "label_ids": ["3", "1"] })));
    }

    #[test]
    fn remove_membership_deletes_item_route() {
        let gateway = RestGateway::new(CannedTransport::status(204, ""), label_routes());
        block_on(gateway.remove_membership(&ItemId::from("9"), &ListName::from("prioritized")))
            .expect("ok");
        let sent = gateway.transport().sent.borrow();
        assert_eq!(sent[0].method, HttpMethod::Delete);
        assert!(sent[0].url.ends_with("/labels/9/remove_priority"));
        assert!(sent[0].body.is_none());
    }

    #[test]
    fn non_success_status_is_server_error() {
        let gateway = RestGateway::new(CannedTransport::status(500, "boom"), RestRoutes::default());
        let err = block_on(gateway.add_membership(&ItemId::from("a"), &ListName::from("archive")))
            .expect_err("500");
        assert_eq!(
            err,
            GatewayError::Server {
                status: 500,
                body: "boom".into()
            }
        );
        assert_eq!(gateway.transport().sent.borrow()[0].url, "/lists/archive/items/a");
    }

    #[test]
    fn transport_failure_is_network_error() {
        let transport = CannedTransport {
            reply: Err(TransportError("connection refused".into())),
            sent: RefCell::new(Vec::new()),
        };
        let gateway = RestGateway::new(transport, RestRoutes::default());
        let err = block_on(gateway.persist_order(&ListName::from("p"), &[])).expect_err("refused");
        assert_eq!(err, GatewayError::Network("connection refused".into()));
    }

    #[test]
    fn path_segments_are_percent_encoded() {
        let gateway = RestGateway::new(CannedTransport::status(200, ""), RestRoutes::default());
        block_on(gateway.add_membership(&ItemId::from("a/b?c d"), &ListName::from("to do#1")))
            .expect("ok");
        assert_eq!(
            gateway.transport().sent.borrow()[0].url,
            "/lists/to%20do%231/items/a%2Fb%3Fc%20d"
        );
    }

    #[test]
    fn unreserved_characters_pass_through() {
        let routes = RestRoutes::default();
        let url = routes.expand(
            &routes.remove_membership,
            &ListName::from("prioritized"),
            Some(&ItemId::from("label-1_v2.0~x")),
        );
        assert_eq!(url, "/lists/prioritized/items/label-1_v2.0~x");
    }
}
