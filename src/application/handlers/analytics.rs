//! Analytics subscriptions and metric deltas.

use serde_json::{json, Value};

use crate::domain::foundation::ValidationError;
use crate::domain::realtime::{Connection, EventDomain, EventKind, RoomName};

use super::{created_by, unsupported, DomainHandler, Fields, HandlerOutcome};

pub struct AnalyticsHandler;

impl AnalyticsHandler {
    /// `analytics:subscribe {metrics: [name, ..]}` acknowledged to the user only.
    fn subscribe(&self, connection: &Connection, data: &Value) -> Result<HandlerOutcome, ValidationError> {
        let identity = &connection.identity;
        let fields = Fields::of(data)?;
        let metrics = fields.non_empty_array("metrics")?;
        let names = metrics
            .iter()
            .map(|metric| match metric {
                Value::String(name) if !name.trim().is_empty() => Ok(name.as_str()),
                _ => Err(ValidationError::invalid_format(
                    "metrics",
                    "must contain non-empty strings",
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(HandlerOutcome::new(
            "analytics:subscribed",
            json!({
                "metrics": names,
                "createdBy": created_by(identity),
            }),
        )
        .to_room(RoomName::user(&identity.user_id)))
    }

    /// `analytics:update {metrics: {..}, outletId?}` → `analytics:delta`
    fn update(&self, connection: &Connection, data: &Value) -> Result<HandlerOutcome, ValidationError> {
        let identity = &connection.identity;
        let fields = Fields::of(data)?;
        fields.object("metrics")?;

        let mut body = fields.to_map();
        body.insert("createdBy".to_string(), created_by(identity));
        let mut outcome = HandlerOutcome::new("analytics:delta", Value::Object(body))
            .to_room(RoomName::tenant(&identity.tenant_id));

        if fields.opt_str("outletId")?.is_some() {
            let outlet_id = fields.outlet_or(&identity.outlet_id)?;
            outcome = outcome.to_room(RoomName::outlet(&outlet_id));
        }
        Ok(outcome)
    }
}

impl DomainHandler for AnalyticsHandler {
    fn domain(&self) -> EventDomain {
        EventDomain::Analytics
    }

    fn handle(
        &self,
        connection: &Connection,
        kind: EventKind,
        data: &Value,
    ) -> Result<HandlerOutcome, ValidationError> {
        match kind {
            EventKind::AnalyticsSubscribe => self.subscribe(connection, data),
            EventKind::AnalyticsUpdate => self.update(connection, data),
            other => Err(unsupported(other)),
        }
    }
}
