//! In-memory restaurant catalog.
//!
//! Serves `/pratos`, `/chefs`, `/pedidos`, `/bebidas` and `/restaurantes`.
//! Each resource is a collection of JSON objects keyed by a sequential id.
//!
//! | Method | Path         | Result                                  |
//! |--------|--------------|-----------------------------------------|
//! | `GET`  | `/{r}`       | `200` with every item                   |
//! | `GET`  | `/{r}/{id}`  | `200` with the item, `404` if absent    |
//! | `POST` | `/{r}`       | `201` with the stored item and its `id` |
//!
//! Anything else on a known resource is `405`; unknown paths are `404`.

use crate::handler::CrudHandler;
use bytes::Bytes;
use http::header::{HeaderValue, ALLOW, LOCATION};
use http::{Method, StatusCode};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use trattoria_core::ErrorEnvelope;
use trattoria_middleware::{body_bytes, BoxFuture, Request, Response, ResponseExt};

/// Resources served by the catalog.
pub const RESOURCES: [&str; 5] = ["pratos", "chefs", "pedidos", "bebidas", "restaurantes"];

#[derive(Debug, Default)]
struct Collection {
    next_id: u64,
    items: BTreeMap<u64, Value>,
}

impl Collection {
    fn insert(&mut self, mut object: Map<String, Value>) -> Value {
        self.next_id += 1;
        let id = self.next_id;
        object.insert("id".to_string(), Value::from(id));
        let item = Value::Object(object);
        self.items.insert(id, item.clone());
        item
    }
}

/// Where a path points inside the catalog.
#[derive(Debug, PartialEq, Eq)]
enum Target<'a> {
    Collection(&'a str),
    Item(&'a str, &'a str),
}

fn target(path: &str) -> Option<Target<'_>> {
    let trimmed = path.trim_matches('/');
    let mut segments = trimmed.split('/');
    let resource = segments.next().filter(|r| RESOURCES.contains(r))?;
    match (segments.next(), segments.next()) {
        (None, _) => Some(Target::Collection(resource)),
        (Some(id), None) => Some(Target::Item(resource, id)),
        (Some(_), Some(_)) => None,
    }
}

/// Thread-safe in-memory store for the restaurant resources.
#[derive(Debug)]
pub struct Catalog {
    collections: BTreeMap<&'static str, RwLock<Collection>>,
}

impl Catalog {
    /// Creates a catalog with every resource empty.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RESOURCES
                .iter()
                .map(|name| (*name, RwLock::new(Collection::default())))
                .collect(),
        }
    }

    /// Returns how many items a resource holds.
    #[must_use]
    pub fn count(&self, resource: &str) -> usize {
        self.collections
            .get(resource)
            .map_or(0, |collection| collection.read().items.len())
    }

    fn list(&self, resource: &str) -> Response {
        let items: Vec<Value> = self
            .collections
            .get(resource)
            .map(|collection| collection.read().items.values().cloned().collect())
            .unwrap_or_default();
        json_value(StatusCode::OK, &Value::Array(items))
    }

    fn get(&self, resource: &str, id: &str) -> Response {
        let found = id.parse::<u64>().ok().and_then(|id| {
            self.collections
                .get(resource)
                .and_then(|collection| collection.read().items.get(&id).cloned())
        });
        match found {
            Some(item) => json_value(StatusCode::OK, &item),
            None => not_found(&format!("No item {} in /{}", id, resource)),
        }
    }

    fn create(&self, resource: &str, body: &Bytes) -> Response {
        let object = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(object)) => object,
            Ok(_) => return bad_request("Request body must be a JSON object"),
            Err(err) => return bad_request(&format!("Request body is not valid JSON: {}", err)),
        };
        let Some(collection) = self.collections.get(resource) else {
            return not_found(&format!("Unknown resource /{}", resource));
        };

        let item = collection.write().insert(object);
        tracing::debug!(resource, id = %item["id"], "catalog item created");

        let mut response = json_value(StatusCode::CREATED, &item);
        if let Ok(location) = HeaderValue::from_str(&format!("/{}/{}", resource, item["id"])) {
            response.headers_mut().insert(LOCATION, location);
        }
        response
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl CrudHandler for Catalog {
    fn handle(&self, request: Request) -> BoxFuture<'_, Response> {
        Box::pin(async move {
            let (parts, body) = request.into_parts();
            match (target(parts.uri.path()), &parts.method) {
                (Some(Target::Collection(resource)), &Method::GET) => self.list(resource),
                (Some(Target::Collection(resource)), &Method::POST) => {
                    self.create(resource, &body_bytes(body).await)
                }
                (Some(Target::Item(resource, id)), &Method::GET) => self.get(resource, id),
                (Some(Target::Collection(_)), _) => method_not_allowed("GET, POST"),
                (Some(Target::Item(..)), _) => method_not_allowed("GET"),
                (None, _) => not_found(&format!("No route for {}", parts.uri.path())),
            }
        })
    }
}

fn json_value(status: StatusCode, value: &Value) -> Response {
    Response::json(status, value.to_string())
}

fn bad_request(message: &str) -> Response {
    Response::json_error(
        StatusCode::BAD_REQUEST,
        &ErrorEnvelope::new("Bad Request", message),
    )
}

fn not_found(message: &str) -> Response {
    Response::json_error(
        StatusCode::NOT_FOUND,
        &ErrorEnvelope::new("Not Found", message),
    )
}

fn method_not_allowed(allow: &'static str) -> Response {
    let mut response = Response::json_error(
        StatusCode::METHOD_NOT_ALLOWED,
        &ErrorEnvelope::new("Method Not Allowed", format!("Allowed methods: {}", allow)),
    );
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static(allow));
    response
}
