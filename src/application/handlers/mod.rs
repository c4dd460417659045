//! Domain event handlers.
//!
//! Each handler owns one [`EventDomain`], validates the payloads of that
//! domain's inbound events and decides which rooms the resulting broadcast
//! targets. Handlers are synchronous and pure with respect to room
//! computation; publishing is left to the pipeline.
//!
//! New domains plug in through [`HandlerRegistry::register`] without touching
//! the dispatch core.

mod analytics;
mod inventory;
mod kitchen;
mod order;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::domain::foundation::{Identity, OutletId, ValidationError};
use crate::domain::realtime::{Connection, EventDomain, EventKind, RoomName};

pub use analytics::AnalyticsHandler;
pub use inventory::InventoryHandler;
pub use kitchen::{KitchenHandler, KOT_STATUSES};
pub use order::OrderHandler;

/// What a handler decided for one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutcome {
    pub target_rooms: Vec<RoomName>,
    pub outbound_type: String,
    pub outbound_payload: Value,
}

impl HandlerOutcome {
    pub fn new(outbound_type: impl Into<String>, outbound_payload: Value) -> Self {
        Self {
            target_rooms: Vec::new(),
            outbound_type: outbound_type.into(),
            outbound_payload,
        }
    }

    pub fn to_room(mut self, room: RoomName) -> Self {
        self.target_rooms.push(room);
        self
    }
}

/// Handler for every inbound event of one domain.
pub trait DomainHandler: Send + Sync {
    fn domain(&self) -> EventDomain;

    /// Validates `data` and computes the broadcast for it.
    ///
    /// Must not publish or mutate shared state.
    fn handle(
        &self,
        connection: &Connection,
        kind: EventKind,
        data: &Value,
    ) -> Result<HandlerOutcome, ValidationError>;
}

/// Maps event domains to their handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<EventDomain, Arc<dyn DomainHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the order, kitchen, inventory and analytics handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OrderHandler));
        registry.register(Arc::new(KitchenHandler));
        registry.register(Arc::new(InventoryHandler));
        registry.register(Arc::new(AnalyticsHandler));
        registry
    }

    /// Registers a handler, replacing any previous one for its domain.
    pub fn register(&mut self, handler: Arc<dyn DomainHandler>) -> &mut Self {
        self.handlers.insert(handler.domain(), handler);
        self
    }

    pub fn get(&self, domain: EventDomain) -> Option<Arc<dyn DomainHandler>> {
        self.handlers.get(&domain).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Provenance attached to client-originated broadcasts.
pub fn created_by(identity: &Identity) -> Value {
    json!({
        "userId": identity.user_id.as_str(),
        "tenantId": identity.tenant_id.as_str(),
        "outletId": identity.outlet_id.as_str(),
        "role": identity.role.as_str(),
    })
}

fn unsupported(kind: EventKind) -> ValidationError {
    ValidationError::UnknownEventType(kind.as_str().to_string())
}

// ════════════════════════════════════════════════════════════════════════════════
// Payload access
// ════════════════════════════════════════════════════════════════════════════════

/// Validated read access to a JSON object payload.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fields<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    /// The event payload itself; it must be an object.
    pub fn of(data: &'a Value) -> Result<Self, ValidationError> {
        match data {
            Value::Object(map) => Ok(Self { map }),
            Value::Null => Err(ValidationError::missing_field("data")),
            _ => Err(ValidationError::invalid_format("data", "must be an object")),
        }
    }

    /// A nested object field.
    pub fn object(&self, field: &str) -> Result<Fields<'a>, ValidationError> {
        match self.map.get(field) {
            Some(Value::Object(map)) => Ok(Fields { map }),
            Some(_) => Err(ValidationError::invalid_format(field, "must be an object")),
            None => Err(ValidationError::missing_field(field)),
        }
    }

    pub fn str(&self, field: &str) -> Result<&'a str, ValidationError> {
        self.opt_str(field)?
            .ok_or_else(|| ValidationError::missing_field(field))
    }

    pub fn opt_str(&self, field: &str) -> Result<Option<&'a str>, ValidationError> {
        match self.map.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => {
                Err(ValidationError::empty_field(field))
            }
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(ValidationError::invalid_format(field, "must be a string")),
        }
    }

    pub fn bool(&self, field: &str) -> Result<bool, ValidationError> {
        match self.map.get(field) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(ValidationError::invalid_format(field, "must be a boolean")),
            None => Err(ValidationError::missing_field(field)),
        }
    }

    pub fn number(&self, field: &str) -> Result<f64, ValidationError> {
        self.opt_number(field)?
            .ok_or_else(|| ValidationError::missing_field(field))
    }

    pub fn opt_number(&self, field: &str) -> Result<Option<f64>, ValidationError> {
        match self.map.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| ValidationError::invalid_format(field, "must be a number")),
            Some(_) => Err(ValidationError::invalid_format(field, "must be a number")),
        }
    }

    /// An array field with at least one element.
    pub fn non_empty_array(&self, field: &str) -> Result<&'a [Value], ValidationError> {
        match self.map.get(field) {
            Some(Value::Array(items)) if items.is_empty() => {
                Err(ValidationError::empty_field(field))
            }
            Some(Value::Array(items)) => Ok(items.as_slice()),
            Some(_) => Err(ValidationError::invalid_format(field, "must be an array")),
            None => Err(ValidationError::missing_field(field)),
        }
    }

    /// The payload's `outletId`, or the sender's own outlet when absent.
    pub fn outlet_or(&self, fallback: &OutletId) -> Result<OutletId, ValidationError> {
        match self.opt_str("outletId")? {
            Some(id) => OutletId::new(id),
            None => Ok(fallback.clone()),
        }
    }

    /// Copy of the payload with `outletId` resolved and `createdBy` attached.
    pub fn stamped(&self, outlet_id: &OutletId, identity: &Identity) -> Value {
        let mut body = self.map.clone();
        body.insert(
            "outletId".to_string(),
            Value::String(outlet_id.as_str().to_string()),
        );
        body.insert("createdBy".to_string(), created_by(identity));
        Value::Object(body)
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.map.clone()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_cover_every_domain() {
        let registry = HandlerRegistry::with_defaults();
        assert_eq!(registry.len(), 4);
        for kind in EventKind::ALL {
            let handler = registry.get(kind.domain()).unwrap();
            assert_eq!(handler.domain(), kind.domain());
        }
    }

    #[test]
    fn register_replaces_existing_domain_handler() {
        struct Quiet;
        impl DomainHandler for Quiet {
            fn domain(&self) -> EventDomain {
                EventDomain::Order
            }
            fn handle(
                &self,
                _: &Connection,
                _: EventKind,
                _: &Value,
            ) -> Result<HandlerOutcome, ValidationError> {
                Ok(HandlerOutcome::new("quiet", Value::Null))
            }
        }

        let mut registry = HandlerRegistry::with_defaults();
        registry.register(Arc::new(Quiet));
        let conn = test_support::staff_connection();
        let outcome = registry
            .get(EventDomain::Order)
            .unwrap()
            .handle(&conn, EventKind::OrderCreate, &json!({}))
            .unwrap();
        assert_eq!(outcome.outbound_type, "quiet");
    }

    #[test]
    fn fields_reject_non_object_payloads() {
        assert_eq!(
            Fields::of(&Value::Null).unwrap_err(),
            ValidationError::missing_field("data")
        );
        assert!(matches!(
            Fields::of(&json!([1, 2])),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn fields_distinguish_missing_empty_and_mistyped() {
        let data = json!({"a": "", "b": 3, "c": "ok"});
        let fields = Fields::of(&data).unwrap();
        assert_eq!(fields.str("a").unwrap_err(), ValidationError::empty_field("a"));
        assert!(matches!(fields.str("b"), Err(ValidationError::InvalidFormat { .. })));
        assert_eq!(fields.str("z").unwrap_err(), ValidationError::missing_field("z"));
        assert_eq!(fields.str("c").unwrap(), "ok");
    }

    #[test]
    fn outlet_defaults_to_sender() {
        let conn = test_support::staff_connection();
        let data = json!({});
        let outlet = Fields::of(&data)
            .unwrap()
            .outlet_or(&conn.identity.outlet_id)
            .unwrap();
        assert_eq!(outlet.as_str(), "o1");
    }

    #[test]
    fn stamped_payload_carries_provenance() {
        let conn = test_support::staff_connection();
        let data = json!({"itemId": "i1"});
        let body = Fields::of(&data)
            .unwrap()
            .stamped(&conn.identity.outlet_id, &conn.identity);
        assert_eq!(body["outletId"], "o1");
        assert_eq!(body["createdBy"]["userId"], "u1");
        assert_eq!(body["createdBy"]["role"], "staff");
    }
}
