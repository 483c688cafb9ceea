use super::Disposition;
use common::{Core, TemplateEvent, TemplateStatus};
use tracing::debug;

/// Record a template approval-state change in the workspace registry.
/// Campaign start consults this registry.
pub(crate) fn apply_template_event(core: &Core, event: &TemplateEvent) -> Disposition {
    let status = TemplateStatus::from_upstream(&event.event);
    core.templates.set_status(
        &event.workspace_id,
        &event.template_name,
        &event.template_language,
        status,
    );
    debug!(
        template = %event.template_name,
        language = %event.template_language,
        status = ?status,
        "template status updated"
    );
    Disposition::Ack
}
