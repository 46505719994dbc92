//! Endpoint registry
//!
//! Modules describe what they serve as a list of [`Endpoint`]s. Paths match
//! case-insensitively and exactly; several endpoints may share a path, the
//! last registered one being the effective handler.

use crate::channel::Channel;
use crate::error::ApiResult;
use crate::query::Params;
pub use axum::http::Method;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub type HttpHandler = Arc<dyn Fn(Params) -> BoxFuture<'static, ApiResult<Value>> + Send + Sync>;

/// Receives the request path, the frame payload and the requesting channel.
/// `Ok(None)` sends nothing back.
pub type ChannelHandler = Arc<
    dyn Fn(String, Value, Channel) -> BoxFuture<'static, ApiResult<Option<Value>>> + Send + Sync,
>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Http,
    Channel,
}

#[derive(Clone)]
pub enum Endpoint {
    Http {
        method: Method,
        path: String,
        handler: HttpHandler,
    },
    Channel {
        path: String,
        handler: ChannelHandler,
    },
}

impl Endpoint {
    pub fn http<F, Fut>(method: Method, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResult<Value>> + Send + 'static,
    {
        Endpoint::Http {
            method,
            path: path.into(),
            handler: Arc::new(move |params| Box::pin(handler(params))),
        }
    }

    pub fn channel<F, Fut>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(String, Value, Channel) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResult<Option<Value>>> + Send + 'static,
    {
        Endpoint::Channel {
            path: path.into(),
            handler: Arc::new(move |path, data, channel| Box::pin(handler(path, data, channel))),
        }
    }

    pub fn kind(&self) -> EndpointKind {
        match self {
            Endpoint::Http { .. } => EndpointKind::Http,
            Endpoint::Channel { .. } => EndpointKind::Channel,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Endpoint::Http { path, .. } | Endpoint::Channel { path, .. } => path,
        }
    }

    pub fn method(&self) -> Option<&Method> {
        match self {
            Endpoint::Http { method, .. } => Some(method),
            Endpoint::Channel { .. } => None,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.path().to_uppercase() == path.to_uppercase()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Http { method, path, .. } => write!(f, "Http({method} {path})"),
            Endpoint::Channel { path, .. } => write!(f, "Channel({path})"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EndpointList {
    endpoints: Vec<Endpoint>,
}

impl EndpointList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, endpoint: Endpoint) {
        self.endpoints.push(endpoint);
    }

    pub fn register_many(&mut self, endpoints: impl IntoIterator<Item = Endpoint>) {
        self.endpoints.extend(endpoints);
    }

    /// All endpoints matching `path` (and `kind` if given), in registration order
    pub fn find(&self, path: &str, kind: Option<EndpointKind>) -> Vec<&Endpoint> {
        self.endpoints
            .iter()
            .filter(|e| kind.map_or(true, |k| e.kind() == k))
            .filter(|e| e.matches(path))
            .collect()
    }

    /// Effective endpoint for `path`: the last one registered
    pub fn last(&self, path: &str, kind: EndpointKind) -> Option<&Endpoint> {
        self.find(path, Some(kind)).into_iter().last()
    }

    /// Effective HTTP endpoint for `path` and `method`
    pub fn last_http(&self, path: &str, method: &Method) -> Option<&Endpoint> {
        self.find(path, Some(EndpointKind::Http))
            .into_iter()
            .filter(|e| e.method() == Some(method))
            .last()
    }

    /// Distinct HTTP paths with their verbs, spelled as first registered
    pub fn http_routes(&self) -> Vec<(String, Vec<Method>)> {
        let mut routes: Vec<(String, Vec<Method>)> = Vec::new();
        for endpoint in &self.endpoints {
            let Some(method) = endpoint.method() else {
                continue;
            };
            match routes.iter_mut().find(|(path, _)| endpoint.matches(path)) {
                Some((_, methods)) => {
                    if !methods.contains(method) {
                        methods.push(method.clone());
                    }
                }
                None => routes.push((endpoint.path().to_string(), vec![method.clone()])),
            }
        }
        routes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn http(method: Method, path: &str, tag: &'static str) -> Endpoint {
        Endpoint::http(method, path, move |_| async move { Ok(json!(tag)) })
    }

    async fn call(endpoint: &Endpoint) -> Value {
        match endpoint {
            Endpoint::Http { handler, .. } => handler(Params::default()).await.unwrap(),
            Endpoint::Channel { .. } => panic!("not an http endpoint"),
        }
    }

    #[tokio::test]
    async fn test_find_is_case_insensitive_and_exact() {
        let mut list = EndpointList::new();
        list.register(http(Method::GET, "/getMeasures", "a"));

        assert_eq!(list.find("/GETMEASURES", None).len(), 1);
        assert_eq!(list.find("/getmeasures", Some(EndpointKind::Http)).len(), 1);
        assert!(list.find("/getMeasures/", None).is_empty());
        assert!(list.find("/getMeasures", Some(EndpointKind::Channel)).is_empty());
    }

    #[tokio::test]
    async fn test_last_registered_wins() {
        let mut list = EndpointList::new();
        list.register_many([
            http(Method::GET, "/x", "first"),
            http(Method::GET, "/X", "second"),
            http(Method::POST, "/x", "post"),
        ]);

        assert_eq!(list.find("/x", None).len(), 3);
        let last = list.last("/x", EndpointKind::Http).unwrap();
        assert_eq!(call(last).await, json!("post"));

        let get = list.last_http("/x", &Method::GET).unwrap();
        assert_eq!(call(get).await, json!("second"));
        assert!(list.last_http("/x", &Method::DELETE).is_none());
    }

    #[test]
    fn test_http_routes_are_grouped_by_path() {
        let mut list = EndpointList::new();
        list.register_many([
            http(Method::GET, "/a", "1"),
            http(Method::POST, "/A", "2"),
            http(Method::GET, "/a", "3"),
            Endpoint::channel("/a", |_, _, _| async { Ok(None) }),
        ]);

        let routes = list.http_routes();
        assert_eq!(routes, vec![("/a".to_string(), vec![Method::GET, Method::POST])]);
        assert_eq!(list.len(), 4);
    }
}
