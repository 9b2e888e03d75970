use std::fmt;
use std::str::FromStr;

use axum::http::Method;

use crate::error::Error;

/// HTTP methods a mock rule can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MockMethod {
    Get,
    Post,
    Delete,
}

impl MockMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MockMethod::Get => "GET",
            MockMethod::Post => "POST",
            MockMethod::Delete => "DELETE",
        }
    }

    /// Map an incoming request method; anything else can never match a rule
    pub fn from_request(method: &Method) -> Option<Self> {
        match *method {
            Method::GET => Some(MockMethod::Get),
            Method::POST => Some(MockMethod::Post),
            Method::DELETE => Some(MockMethod::Delete),
            _ => None,
        }
    }

    /// Whether rules for this method honour a query filter
    pub fn supports_query_filter(&self) -> bool {
        matches!(self, MockMethod::Get)
    }
}

impl fmt::Display for MockMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MockMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(MockMethod::Get),
            "POST" => Ok(MockMethod::Post),
            "DELETE" => Ok(MockMethod::Delete),
            other => Err(Error::UnsupportedMethod(other.to_string())),
        }
    }
}
