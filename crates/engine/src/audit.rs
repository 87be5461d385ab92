use fintrack_core::audit::{AuditEvent, AuditOutcome, AuditSink};

/// Writes every audit event to the `tracing` pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let approval_id = event.approval_id.as_ref().map_or("unknown", |id| id.0.as_str());
        let tenant_id = event.tenant_id.as_ref().map_or("unknown", |id| id.0.as_str());
        let metadata = format!("{:?}", event.metadata);

        match event.outcome {
            AuditOutcome::Success => tracing::info!(
                event_name = "audit.event",
                audit_event_type = %event.event_type,
                category = ?event.category,
                correlation_id = %event.correlation_id,
                approval_id,
                tenant_id,
                actor = %event.actor,
                metadata = %metadata,
                "audit event recorded"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => tracing::warn!(
                event_name = "audit.event",
                audit_event_type = %event.event_type,
                category = ?event.category,
                outcome = ?event.outcome,
                correlation_id = %event.correlation_id,
                approval_id,
                tenant_id,
                actor = %event.actor,
                metadata = %metadata,
                "audit event recorded"
            ),
        }
    }
}
