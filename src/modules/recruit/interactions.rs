use poise::serenity_prelude::{self as serenity};
use tracing::{debug, trace};

use super::session::{Participant, SessionId};
use super::view::ButtonAction;
use crate::types::{Data, Error};

fn participant(interaction: &serenity::ComponentInteraction) -> Participant {
    let name = match &interaction.member {
        Some(member) => member.display_name().to_owned(),
        None => interaction.user.display_name().to_owned(),
    };

    Participant::new(interaction.user.id, name)
}

/// Handles the join/leave/cancel buttons under a recruitment status message
pub(crate) async fn handle_component(
    ctx: &serenity::Context,
    interaction: &serenity::ComponentInteraction,
    data: &Data,
) -> Result<(), Error> {
    let Some((action, raw_id)) = ButtonAction::parse(&interaction.data.custom_id) else {
        trace!(custom_id = interaction.data.custom_id.as_str(), "not a recruitment button, ignoring");
        return Ok(());
    };

    // sending notifications can take a while, acknowledge first
    interaction
        .create_response(ctx, serenity::CreateInteractionResponse::Acknowledge)
        .await?;

    let user = participant(interaction);
    let user_id = user.id;
    let manager = &data.recruit;

    // the manager redraws or closes the status message itself
    let result = match raw_id.parse::<SessionId>() {
        Err(err) => Err(err),
        Ok(id) => match action {
            ButtonAction::Join => manager.join(id, user).await.map(|_| ()),
            ButtonAction::Leave => manager.leave(id, user_id).await.map(|_| ()),
            ButtonAction::Cancel => manager.cancel(id, user_id).await.map(|_| ()),
        },
    };

    if let Err(err) = result {
        debug!(
            user.id = user_id.get(),
            custom_id = interaction.data.custom_id.as_str(),
            "button rejected: {}",
            err
        );
        interaction
            .create_followup(
                ctx,
                serenity::CreateInteractionResponseFollowup::new()
                    .content(err.user_message())
                    .ephemeral(true),
            )
            .await?;
    }

    Ok(())
}
