use std::collections::BTreeMap;
use std::time::Duration;

use axum::body::Bytes;
use serde_json::Value;

use crate::method::MockMethod;

/// Path of the rule that is always present
pub const ROOT_PATH: &str = "/";
/// Body served by the root rule
pub const ROOT_RESPONSE: &str = "Mock API server is up";
/// Delay applied to a mocked reply when none is configured
pub const DEFAULT_IDLE_TIME: Duration = Duration::from_millis(100);

/// Query parameters as an exact key/value map
pub type QueryFilter = BTreeMap<String, String>;

/// Decoded query pairs in request order, repeated keys included
pub type QueryParams = Vec<(String, String)>;

/// Decode a raw query string into its key/value pairs
pub fn parse_query(raw: Option<&str>) -> QueryParams {
    raw.map(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect()
    })
    .unwrap_or_default()
}

/// What a rule replies with
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Plain text, used by the root rule
    Text(&'static str),
    /// Any JSON value, `null` included
    Json(Value),
}

/// Identity of a rule; registering the same key twice replaces the first rule
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleKey {
    pub method: MockMethod,
    pub path: String,
    pub query: Option<QueryFilter>,
}

/// One registered mock
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub method: MockMethod,
    pub path: String,
    pub query: Option<QueryFilter>,
    pub reply: Reply,
    pub idle_time: Duration,
    pub record_body: bool,
}

impl Rule {
    /// The `GET /` rule that answers immediately with [`ROOT_RESPONSE`]
    pub fn root() -> Self {
        Self {
            method: MockMethod::Get,
            path: ROOT_PATH.to_string(),
            query: None,
            reply: Reply::Text(ROOT_RESPONSE),
            idle_time: Duration::ZERO,
            record_body: false,
        }
    }

    pub fn key(&self) -> RuleKey {
        RuleKey {
            method: self.method,
            path: self.path.clone(),
            query: self.query.clone(),
        }
    }

    /// Structural match on method, path and (for filtered rules) the exact query
    ///
    /// A request that repeats a query key never matches a filtered rule.
    pub fn matches(&self, request: &IncomingRequest) -> bool {
        if self.method != request.method || self.path != request.path {
            return false;
        }
        match &self.query {
            Some(query) => request.query_map().is_some_and(|q| q == *query),
            None => true,
        }
    }

    fn specificity(&self) -> u8 {
        u8::from(self.query.is_some())
    }
}

/// A mocked response as requested by a test, before it becomes a [`Rule`]
#[derive(Debug, Clone, PartialEq)]
pub struct MockResponse {
    pub route: String,
    pub method: MockMethod,
    pub data: Value,
    pub query: Option<QueryFilter>,
    pub record_body: bool,
    pub idle_time: Duration,
}

impl MockResponse {
    pub fn new(route: impl Into<String>, method: MockMethod, data: Value) -> Self {
        Self {
            route: route.into(),
            method,
            data,
            query: None,
            record_body: false,
            idle_time: DEFAULT_IDLE_TIME,
        }
    }

    /// Only match requests whose query parameters equal `query` exactly
    #[must_use]
    pub fn with_query(mut self, query: Option<QueryFilter>) -> Self {
        self.query = query;
        self
    }

    /// Record the body of every matching request
    #[must_use]
    pub fn with_record_body(mut self, record_body: bool) -> Self {
        self.record_body = record_body;
        self
    }

    #[must_use]
    pub fn with_idle_time(mut self, idle_time: Duration) -> Self {
        self.idle_time = idle_time;
        self
    }

    /// Build the rule; query filters on non-GET methods are dropped
    pub fn into_rule(self) -> Rule {
        let method = self.method;
        let query = self.query.filter(|_| method.supports_query_filter());
        Rule {
            method,
            path: self.route,
            query,
            reply: Reply::Json(self.data),
            idle_time: self.idle_time,
            record_body: self.record_body,
        }
    }
}

/// A request as seen by the rule table
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: MockMethod,
    pub path: String,
    pub query: QueryParams,
    pub body: Bytes,
}

impl IncomingRequest {
    /// The query as a map, or `None` if any key appears more than once
    pub fn query_map(&self) -> Option<QueryFilter> {
        let map: QueryFilter = self.query.iter().cloned().collect();
        (map.len() == self.query.len()).then_some(map)
    }

    /// The body as it is stored in the received data buffer
    ///
    /// JSON bodies are kept as parsed values, anything else as a string.
    pub fn body_value(&self) -> Value {
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&self.body).into_owned()))
    }
}

/// Registered rules on top of the root rule
///
/// The root rule is held apart from user registrations: a user `GET /` rule
/// shadows it, and [`RuleTable::reset`] brings it back.
#[derive(Debug, Clone)]
pub struct RuleTable {
    root: Rule,
    rules: Vec<Rule>,
}

impl RuleTable {
    /// Create a table answering only the root route
    pub fn new() -> Self {
        Self {
            root: Rule::root(),
            rules: Vec::new(),
        }
    }

    /// Register a rule, replacing any rule with the same key
    ///
    /// Returns `true` if an existing rule was replaced.
    pub fn register(&mut self, rule: Rule) -> bool {
        let key = rule.key();
        if let Some(existing) = self.rules.iter_mut().find(|r| r.key() == key) {
            *existing = rule;
            true
        } else {
            self.rules.push(rule);
            false
        }
    }

    /// Drop every user registration
    pub fn reset(&mut self) {
        self.rules.clear();
    }

    /// Find the most specific rule matching `request`
    ///
    /// User rules are consulted first; the root rule only answers when none
    /// of them match.
    pub fn find(&self, request: &IncomingRequest) -> Option<&Rule> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(request))
            .max_by_key(|rule| rule.specificity())
            .or_else(|| Some(&self.root).filter(|root| root.matches(request)))
    }

    /// User registrations in the order they were first made
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn root(&self) -> &Rule {
        &self.root
    }

    fn all_rules(&self) -> impl Iterator<Item = &Rule> {
        std::iter::once(&self.root).chain(&self.rules)
    }

    pub fn stats(&self) -> RuleTableStats {
        let mut method_distribution = BTreeMap::new();
        for rule in self.all_rules() {
            *method_distribution.entry(rule.method).or_insert(0) += 1;
        }

        RuleTableStats {
            total_rules: self.rules.len() + 1,
            method_distribution,
            query_filtered: self.all_rules().filter(|r| r.query.is_some()).count(),
            recording: self.all_rules().filter(|r| r.record_body).count(),
        }
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about the rule table
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTableStats {
    pub total_rules: usize,
    pub method_distribution: BTreeMap<MockMethod, usize>,
    pub query_filtered: usize,
    pub recording: usize,
}

impl RuleTableStats {
    pub fn summary(&self) -> String {
        let methods: Vec<String> = self
            .method_distribution
            .iter()
            .map(|(method, count)| format!("{method}: {count}"))
            .collect();

        format!(
            "Rules: {}, Methods: [{}], Query filtered: {}, Recording: {}",
            self.total_rules,
            methods.join(", "),
            self.query_filtered,
            self.recording
        )
    }
}
