//! Request Router
//!
//! Maps `(method, path)` to a handler and the route template reported on the
//! request span. Paths are matched exactly; neither service has path
//! parameters.

use hyper::Method;
use thiserror::Error;

/// Router errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    #[error("No route for path: {0}")]
    NotFound(String),

    #[error("Method {method} not allowed for {route}")]
    MethodNotAllowed {
        method: Method,
        route: &'static str,
    },
}

struct Route<H> {
    method: Method,
    path: &'static str,
    handler: H,
}

/// A resolved route
#[derive(Debug)]
pub struct RouteMatch<'a, H> {
    /// Route template, e.g. `/orders`
    pub route: &'static str,
    pub handler: &'a H,
}

/// Exact-match route table
pub struct Router<H> {
    routes: Vec<Route<H>>,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<H> Router<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method` on `path`
    pub fn route(mut self, method: Method, path: &'static str, handler: H) -> Self {
        self.routes.push(Route {
            method,
            path,
            handler,
        });
        self
    }

    /// Find the handler for a request
    ///
    /// # Returns
    ///
    /// * `Err(RouterError::MethodNotAllowed)` - If the path exists under other methods
    /// * `Err(RouterError::NotFound)` - If no route has this path
    pub fn resolve(&self, method: &Method, path: &str) -> Result<RouteMatch<'_, H>, RouterError> {
        let mut path_route = None;

        for route in self.routes.iter().filter(|r| r.path == path) {
            if route.method == *method {
                return Ok(RouteMatch {
                    route: route.path,
                    handler: &route.handler,
                });
            }
            path_route = Some(route.path);
        }

        match path_route {
            Some(route) => Err(RouterError::MethodNotAllowed {
                method: method.clone(),
                route,
            }),
            None => Err(RouterError::NotFound(path.to_string())),
        }
    }

    /// Methods registered for `path`
    pub fn allowed_methods(&self, path: &str) -> Vec<&Method> {
        self.routes
            .iter()
            .filter(|r| r.path == path)
            .map(|r| &r.method)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router<&'static str> {
        Router::new()
            .route(Method::GET, "/health", "health")
            .route(Method::POST, "/orders", "create_order")
    }

    #[test]
    fn test_resolve_exact_route() {
        let router = router();
        let matched = router.resolve(&Method::POST, "/orders").unwrap();
        assert_eq!(matched.route, "/orders");
        assert_eq!(*matched.handler, "create_order");
    }

    #[test]
    fn test_wrong_method() {
        let router = router();
        assert_eq!(
            router.resolve(&Method::GET, "/orders").unwrap_err(),
            RouterError::MethodNotAllowed {
                method: Method::GET,
                route: "/orders"
            }
        );
        assert_eq!(router.allowed_methods("/orders"), vec![&Method::POST]);
    }

    #[test]
    fn test_unknown_path() {
        let router = router();
        assert!(matches!(
            router.resolve(&Method::GET, "/orders/123"),
            Err(RouterError::NotFound(_))
        ));
        assert!(router.allowed_methods("/orders/123").is_empty());
    }
}
