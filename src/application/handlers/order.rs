//! Order events: creation, updates and cancellation.

use serde_json::{json, Value};

use crate::domain::foundation::ValidationError;
use crate::domain::realtime::{Connection, EventDomain, EventKind, RoomName};

use super::{created_by, unsupported, DomainHandler, Fields, HandlerOutcome};

/// Routes order events to the outlet and, when the kitchen must react, to the
/// outlet's kitchen displays.
pub struct OrderHandler;

impl OrderHandler {
    /// `order:create {order: {id, outletId?, items[..], ...}}` → `order:new`
    fn create(&self, connection: &Connection, data: &Value) -> Result<HandlerOutcome, ValidationError> {
        let identity = &connection.identity;
        let order = Fields::of(data)?.object("order")?;
        order.str("id")?;
        order.non_empty_array("items")?;
        let outlet_id = order.outlet_or(&identity.outlet_id)?;

        let mut body = order.to_map();
        body.insert(
            "outletId".to_string(),
            Value::String(outlet_id.as_str().to_string()),
        );
        let payload = json!({
            "order": Value::Object(body),
            "createdBy": created_by(identity),
        });

        Ok(HandlerOutcome::new("order:new", payload)
            .to_room(RoomName::outlet(&outlet_id))
            .to_room(RoomName::kitchen(&outlet_id)))
    }

    /// `order:update {orderId, outletId?, ...}` → `order:updated`
    fn update(&self, connection: &Connection, data: &Value) -> Result<HandlerOutcome, ValidationError> {
        let identity = &connection.identity;
        let fields = Fields::of(data)?;
        fields.str("orderId")?;
        fields.opt_str("status")?;
        let outlet_id = fields.outlet_or(&identity.outlet_id)?;

        Ok(
            HandlerOutcome::new("order:updated", fields.stamped(&outlet_id, identity))
                .to_room(RoomName::outlet(&outlet_id)),
        )
    }

    /// `order:cancel {orderId, outletId?, reason?}` → `order:cancelled`
    fn cancel(&self, connection: &Connection, data: &Value) -> Result<HandlerOutcome, ValidationError> {
        let identity = &connection.identity;
        let fields = Fields::of(data)?;
        fields.str("orderId")?;
        fields.opt_str("reason")?;
        let outlet_id = fields.outlet_or(&identity.outlet_id)?;

        Ok(
            HandlerOutcome::new("order:cancelled", fields.stamped(&outlet_id, identity))
                .to_room(RoomName::outlet(&outlet_id))
                .to_room(RoomName::kitchen(&outlet_id)),
        )
    }
}

impl DomainHandler for OrderHandler {
    fn domain(&self) -> EventDomain {
        EventDomain::Order
    }

    fn handle(
        &self,
        connection: &Connection,
        kind: EventKind,
        data: &Value,
    ) -> Result<HandlerOutcome, ValidationError> {
        match kind {
            EventKind::OrderCreate => self.create(connection, data),
            EventKind::OrderUpdate => self.update(connection, data),
            EventKind::OrderCancel => self.cancel(connection, data),
            other => Err(unsupported(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::test_support::staff_connection;

    fn rooms(outcome: &HandlerOutcome) -> Vec<String> {
        outcome.target_rooms.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn create_targets_outlet_and_kitchen() {
        let conn = staff_connection();
        let data = json!({"order": {"id": "ord-1", "outletId": "o1", "items": [{"sku": "A"}]}});

        let outcome = OrderHandler
            .handle(&conn, EventKind::OrderCreate, &data)
            .unwrap();

        assert_eq!(outcome.outbound_type, "order:new");
        assert_eq!(rooms(&outcome), vec!["outlet:o1", "kitchen:o1"]);
        assert_eq!(outcome.outbound_payload["order"]["id"], "ord-1");
        assert_eq!(outcome.outbound_payload["createdBy"]["userId"], "u1");
    }

    #[test]
    fn create_uses_sender_outlet_when_missing() {
        let conn = staff_connection();
        let data = json!({"order": {"id": "ord-1", "items": [1]}});

        let outcome = OrderHandler
            .handle(&conn, EventKind::OrderCreate, &data)
            .unwrap();

        assert_eq!(outcome.outbound_payload["order"]["outletId"], "o1");
        assert_eq!(rooms(&outcome), vec!["outlet:o1", "kitchen:o1"]);
    }

    #[test]
    fn create_requires_items() {
        let conn = staff_connection();
        let empty = json!({"order": {"id": "ord-1", "items": []}});
        let missing = json!({"order": {"id": "ord-1"}});

        assert_eq!(
            OrderHandler
                .handle(&conn, EventKind::OrderCreate, &empty)
                .unwrap_err(),
            ValidationError::empty_field("items")
        );
        assert_eq!(
            OrderHandler
                .handle(&conn, EventKind::OrderCreate, &missing)
                .unwrap_err(),
            ValidationError::missing_field("items")
        );
    }

    #[test]
    fn create_requires_order_object() {
        let conn = staff_connection();
        let err = OrderHandler
            .handle(&conn, EventKind::OrderCreate, &json!({"id": "x"}))
            .unwrap_err();
        assert_eq!(err, ValidationError::missing_field("order"));
    }

    #[test]
    fn update_targets_outlet_only() {
        let conn = staff_connection();
        let data = json!({"orderId": "ord-1", "status": "paid"});

        let outcome = OrderHandler
            .handle(&conn, EventKind::OrderUpdate, &data)
            .unwrap();

        assert_eq!(outcome.outbound_type, "order:updated");
        assert_eq!(rooms(&outcome), vec!["outlet:o1"]);
        assert_eq!(outcome.outbound_payload["status"], "paid");
    }

    #[test]
    fn cancel_notifies_kitchen() {
        let conn = staff_connection();
        let data = json!({"orderId": "ord-1", "reason": "customer left"});

        let outcome = OrderHandler
            .handle(&conn, EventKind::OrderCancel, &data)
            .unwrap();

        assert_eq!(outcome.outbound_type, "order:cancelled");
        assert_eq!(rooms(&outcome), vec!["outlet:o1", "kitchen:o1"]);
    }

    #[test]
    fn foreign_kind_is_rejected() {
        let conn = staff_connection();
        assert!(matches!(
            OrderHandler.handle(&conn, EventKind::KotUpdate, &json!({})),
            Err(ValidationError::UnknownEventType(_))
        ));
    }
}
