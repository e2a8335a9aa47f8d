//! Minimal server: `GET` answers with a greeting, `POST` echoes a validated body.
//!
//! ```text
//! cargo run -p methodical-core --example hello
//! curl -s localhost:8000/?name=ada
//! curl -s -X POST localhost:8000/ -H 'content-type: application/json' -d '{"text":"hi"}'
//! ```

use methodical_core::{
    as_handler, init_tracing, CorsDecorator, Endpoint, HandlerOptions, JsonSchema, LogConfig,
    LoggingDecorator, Reply, RequestIdDecorator, Server,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Deserialize)]
struct Greeting {
    name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Message {
    text: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(&LogConfig::default());

    let handler = as_handler(
        [
            Endpoint::get()
                .query(JsonSchema::<Greeting>::new())
                .handler(|ctx| async move {
                    let name = ctx.query.name.unwrap_or_else(|| "world".to_string());
                    Ok(Reply::json(json!({ "hello": name })))
                }),
            Endpoint::post()
                .body(JsonSchema::<Message>::new().refine(|m: &Message, errors| {
                    if m.text.is_empty() {
                        errors.add(methodical_core::FieldError::too_short("text", 1));
                    }
                }))
                .response(JsonSchema::<Message>::new())
                .handler(|ctx| async move { Ok(Reply::json(ctx.body).with_status(201)) }),
        ],
        HandlerOptions::new()
            .decorate(RequestIdDecorator::new())
            .decorate(CorsDecorator::new())
            .decorate(LoggingDecorator::new()),
    )?;

    Server::new(handler).serve().await?;
    Ok(())
}
