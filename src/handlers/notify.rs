//! `POST /notify`

use super::{json_response, parse_json, HandlerContext, HandlerError, HandlerResult};
use crate::telemetry::KeyValue;
use futures::future::BoxFuture;
use futures::FutureExt;
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const SEND_NOTIFICATION_SPAN: &str = "send_notification";

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub email: Option<String>,
    #[serde(rename = "orderId")]
    pub order_id: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct NotifyResponse {
    pub status: &'static str,
    pub email: String,
}

/// Send an email notification under a `send_notification` span
///
/// The span status is left unset on success.
pub fn send_notification(ctx: HandlerContext) -> BoxFuture<'static, HandlerResult> {
    handle(ctx).boxed()
}

async fn handle(ctx: HandlerContext) -> HandlerResult {
    let NotifyRequest { email, order_id } = parse_json(&ctx.body)?;

    let response = ctx
        .tracer
        .in_span_async(SEND_NOTIFICATION_SPAN, &ctx.context, |span| {
            async move {
                let email = email.ok_or(HandlerError::MissingField("email"))?;
                span.set_attribute(KeyValue::new("notification.type", "email"));
                span.set_attribute(KeyValue::new("notification.recipient", email.clone()));

                deliver_email(&email, order_id.as_deref()).await;

                Ok::<_, HandlerError>(NotifyResponse {
                    status: "SENT",
                    email,
                })
            }
            .boxed()
        })
        .await?;

    Ok(json_response(StatusCode::OK, &response))
}

/// Delivery stub: nothing leaves the process
async fn deliver_email(recipient: &str, order_id: Option<&str>) {
    info!(recipient, order_id = order_id.unwrap_or("-"), "Sending notification");
    tokio::task::yield_now().await;
}
