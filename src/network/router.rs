//! Maps method and path onto a handler

use hyper::Method;

use crate::record::{RequestId, CAPTURE_PREFIX};
use crate::{HookError, Result};

/// Every request the server understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Any method at `/h/{id}` or below
    Capture {
        /// Target endpoint
        endpoint_id: String,
    },
    /// `GET /ws/{id}`
    WebSocket {
        /// Endpoint to follow
        endpoint_id: String,
    },
    /// `GET /sse/{id}`
    Sse {
        /// Endpoint to follow
        endpoint_id: String,
    },
    /// `POST /requests/{rid}/replay`
    Replay {
        /// Stored request
        request_id: RequestId,
    },
    /// `GET /requests/{rid}`
    GetRequest {
        /// Stored request
        request_id: RequestId,
    },
    /// `DELETE /requests/{rid}`
    DeleteRequest {
        /// Stored request
        request_id: RequestId,
    },
    /// `POST /endpoints`
    CreateEndpoint,
    /// `GET /endpoints`
    ListEndpoints,
    /// `GET /endpoints/{id}`
    GetEndpoint {
        /// Endpoint
        endpoint_id: String,
    },
    /// `DELETE /endpoints/{id}`
    DeleteEndpoint {
        /// Endpoint
        endpoint_id: String,
    },
    /// `GET /endpoints/{id}/requests`
    ListRequests {
        /// Endpoint
        endpoint_id: String,
    },
    /// `GET /healthz`
    Health,
}

/// Resolve `method` and `path` to a route
///
/// # Errors
///
/// Returns `MissingParameter` for an empty identifier, `InvalidParameter` for a
/// malformed request id, `MethodNotAllowed` or `RouteNotFound` otherwise
pub fn route(method: &Method, path: &str) -> Result<Route> {
    // Capture accepts every method and any trailing path
    if path == CAPTURE_PREFIX.trim_end_matches('/') {
        return Err(HookError::MissingParameter("endpoint ID"));
    }
    if let Some(rest) = path.strip_prefix(CAPTURE_PREFIX) {
        let raw = rest.split('/').next().unwrap_or_default();
        return Ok(Route::Capture {
            endpoint_id: identifier(raw)?,
        });
    }

    let segments: Vec<&str> = path
        .trim_start_matches('/')
        .trim_end_matches('/')
        .split('/')
        .collect();

    match segments.as_slice() {
        ["healthz"] => only(method, &Method::GET, Route::Health),
        ["ws", id] => only(method, &Method::GET, Route::WebSocket {
            endpoint_id: identifier(id)?,
        }),
        ["sse", id] => only(method, &Method::GET, Route::Sse {
            endpoint_id: identifier(id)?,
        }),
        ["ws" | "sse"] => Err(HookError::MissingParameter("endpoint ID")),
        ["requests", rid, "replay"] => only(method, &Method::POST, Route::Replay {
            request_id: request_id(rid)?,
        }),
        ["requests", rid] => {
            let request_id = request_id(rid)?;
            match *method {
                Method::GET => Ok(Route::GetRequest { request_id }),
                Method::DELETE => Ok(Route::DeleteRequest { request_id }),
                _ => Err(HookError::MethodNotAllowed),
            }
        }
        ["endpoints"] => match *method {
            Method::GET => Ok(Route::ListEndpoints),
            Method::POST => Ok(Route::CreateEndpoint),
            _ => Err(HookError::MethodNotAllowed),
        },
        ["endpoints", id] => {
            let endpoint_id = identifier(id)?;
            match *method {
                Method::GET => Ok(Route::GetEndpoint { endpoint_id }),
                Method::DELETE => Ok(Route::DeleteEndpoint { endpoint_id }),
                _ => Err(HookError::MethodNotAllowed),
            }
        }
        ["endpoints", id, "requests"] => only(method, &Method::GET, Route::ListRequests {
            endpoint_id: identifier(id)?,
        }),
        _ => Err(HookError::RouteNotFound(path.to_string())),
    }
}

fn only(method: &Method, expected: &Method, route: Route) -> Result<Route> {
    if method == expected {
        Ok(route)
    } else {
        Err(HookError::MethodNotAllowed)
    }
}

fn identifier(raw: &str) -> Result<String> {
    let decoded = urlencoding::decode(raw).map_err(|_| HookError::InvalidParameter {
        name: "endpoint ID",
        value: raw.to_string(),
    })?;
    if decoded.is_empty() {
        return Err(HookError::MissingParameter("endpoint ID"));
    }
    Ok(decoded.into_owned())
}

fn request_id(raw: &str) -> Result<RequestId> {
    raw.parse().map_err(|_| HookError::InvalidParameter {
        name: "request ID",
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(id: &str) -> Route {
        Route::Capture {
            endpoint_id: id.to_string(),
        }
    }

    #[test]
    fn test_capture_any_method_and_subpath() {
        assert_eq!(route(&Method::POST, "/h/E1").unwrap(), capture("E1"));
        assert_eq!(route(&Method::PATCH, "/h/E1/").unwrap(), capture("E1"));
        assert_eq!(route(&Method::DELETE, "/h/E1/a/b/c").unwrap(), capture("E1"));
        assert_eq!(route(&Method::GET, "/h/a%20b").unwrap(), capture("a b"));
    }

    #[test]
    fn test_capture_missing_id() {
        for path in ["/h", "/h/", "/h//x"] {
            assert!(
                matches!(
                    route(&Method::POST, path),
                    Err(HookError::MissingParameter("endpoint ID"))
                ),
                "{path}"
            );
        }
    }

    #[test]
    fn test_live_routes() {
        assert_eq!(
            route(&Method::GET, "/ws/E1").unwrap(),
            Route::WebSocket {
                endpoint_id: "E1".to_string()
            }
        );
        assert_eq!(
            route(&Method::GET, "/sse/E1").unwrap(),
            Route::Sse {
                endpoint_id: "E1".to_string()
            }
        );
        assert!(matches!(
            route(&Method::POST, "/sse/E1"),
            Err(HookError::MethodNotAllowed)
        ));
        assert!(matches!(
            route(&Method::GET, "/sse"),
            Err(HookError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_request_routes() {
        assert_eq!(
            route(&Method::POST, "/requests/7/replay").unwrap(),
            Route::Replay { request_id: 7 }
        );
        assert_eq!(
            route(&Method::GET, "/requests/7").unwrap(),
            Route::GetRequest { request_id: 7 }
        );
        assert_eq!(
            route(&Method::DELETE, "/requests/7").unwrap(),
            Route::DeleteRequest { request_id: 7 }
        );
        assert!(matches!(
            route(&Method::POST, "/requests/x/replay"),
            Err(HookError::InvalidParameter { name: "request ID", .. })
        ));
    }

    #[test]
    fn test_endpoint_routes() {
        assert_eq!(route(&Method::POST, "/endpoints").unwrap(), Route::CreateEndpoint);
        assert_eq!(route(&Method::GET, "/endpoints/").unwrap(), Route::ListEndpoints);
        assert_eq!(
            route(&Method::DELETE, "/endpoints/E1").unwrap(),
            Route::DeleteEndpoint {
                endpoint_id: "E1".to_string()
            }
        );
        assert_eq!(
            route(&Method::GET, "/endpoints/E1/requests").unwrap(),
            Route::ListRequests {
                endpoint_id: "E1".to_string()
            }
        );
        assert!(matches!(
            route(&Method::PUT, "/endpoints"),
            Err(HookError::MethodNotAllowed)
        ));
    }

    #[test]
    fn test_unknown_route() {
        assert!(matches!(
            route(&Method::GET, "/nope"),
            Err(HookError::RouteNotFound(_))
        ));
        assert_eq!(route(&Method::GET, "/healthz").unwrap(), Route::Health);
    }
}
