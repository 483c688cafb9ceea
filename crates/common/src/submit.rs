use crate::command::OutboundCommand;
use crate::core::Core;
use crate::errors::SubmitError;
use crate::message::{Message, MessageId};

/// Accept a validated command: write the message row, stamp it queued, and
/// put the command on the outbound queue.
///
/// This is the single entry point onto the outbound path; the API layer and
/// the campaign executor both produce commands through it, so the dispatcher
/// sees exactly one shape of work.
pub fn submit(core: &Core, command: OutboundCommand) -> Result<MessageId, SubmitError> {
    command.content.validate()?;

    let message_id = command.message_id;
    let mut message = Message::new_outbound(
        command.workspace_id.clone(),
        command.phone_number_id.clone(),
        command.kind(),
        command.to.clone(),
        command.campaign_id,
    );
    message.id = message_id;

    core.messages.insert(message)?;
    core.messages.mark_queued(&message_id)?;
    core.queues.outbound.enqueue(command);

    Ok(message_id)
}
