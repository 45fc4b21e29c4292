//! `POST /orders`

use super::{json_response, parse_json, HandlerContext, HandlerError, HandlerResult};
use crate::telemetry::{KeyValue, Span, Status};
use futures::future::BoxFuture;
use futures::FutureExt;
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub const PROCESS_ORDER_SPAN: &str = "process_order";
pub const ORDER_PROCESSED_EVENT: &str = "order_processed";

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CreateOrderResponse {
    #[serde(rename = "orderId")]
    pub order_id: String,
    pub status: &'static str,
}

/// Create an order for `userId` under a `process_order` span
///
/// A body that is not a JSON object fails before the span opens; a missing
/// `userId` fails inside it, leaving the span in error.
pub fn create_order(ctx: HandlerContext) -> BoxFuture<'static, HandlerResult> {
    handle(ctx).boxed()
}

async fn handle(ctx: HandlerContext) -> HandlerResult {
    let request: CreateOrderRequest = parse_json(&ctx.body)?;

    let order = ctx
        .tracer
        .in_span(PROCESS_ORDER_SPAN, &ctx.context, |span| {
            process_order(span, request.user_id)
        })?;

    Ok(json_response(StatusCode::OK, &order))
}

fn process_order(
    span: &mut Span,
    user_id: Option<String>,
) -> Result<CreateOrderResponse, HandlerError> {
    let user_id = user_id.ok_or(HandlerError::MissingField("userId"))?;
    let order_id = Uuid::new_v4().to_string();

    span.set_attribute(KeyValue::new("user.id", user_id.clone()));
    span.set_attribute(KeyValue::new("order.id", order_id.clone()));

    info!(order_id = %order_id, user_id = %user_id, "Processing order");

    span.add_event(ORDER_PROCESSED_EVENT, vec![]);
    span.set_status(Status::Ok);

    Ok(CreateOrderResponse {
        order_id,
        status: "CREATED",
    })
}
