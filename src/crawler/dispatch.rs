//! Downstream payloads: dispatched content and completion notifications

use crate::crawler::content::Content;
use crate::crawler::context::CrawlContext;
use crate::crawler::parser::ExtractedPage;
use crate::crawler::request::ContentRequest;
use crate::state::CrawlStatistics;
use crate::{Result, SpindleError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Map, Value};

/// Queue carrying content whose body is base64 encoded
pub const ENCODING_SAFE_QUEUE: &str = "spindle_encoding_safe_process_job";

/// How a page's content was handed downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Direct,
    Queued,
    EncodingSafe,
}

/// Builds the content payload: the fetched content merged with the job's
/// crawl context
pub fn content_payload(
    content: &Content,
    page: &ExtractedPage,
    request: &ContentRequest,
) -> Result<Map<String, Value>> {
    let mut payload = match serde_json::to_value(content)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    payload.insert("title".to_string(), json!(page.title));
    payload.insert(
        "links".to_string(),
        json!({
            "internal": page.internal_links,
            "external": page.external_links,
        }),
    );
    payload.insert("images".to_string(), json!(page.images));

    payload.insert("depth".to_string(), json!(request.depth));
    payload.insert(
        "internal_urls".to_string(),
        json!(request.options.internal_urls),
    );
    payload.insert(
        "store_options".to_string(),
        json!(request.options.store_options),
    );
    payload.insert("source_id".to_string(), json!(request.options.source_id));
    payload.insert("crawl_id".to_string(), json!(request.crawl_id));
    payload.insert("data".to_string(), json!(request.options.data));

    Ok(payload)
}

/// Hands content to the processing collaborator
///
/// A direct call invokes the handler registered under the crawl's
/// processing queue name; otherwise the payload is enqueued, with the body
/// base64 encoded when the crawl asks for encoding-safe transport.
pub async fn send_to_processing_queue(
    ctx: &CrawlContext,
    mut payload: Map<String, Value>,
    request: &ContentRequest,
) -> Result<DispatchMode> {
    let options = &request.options;

    if options.direct_call_process_job {
        let handler = ctx.handler(&options.processing_queue).ok_or_else(|| {
            SpindleError::Processing(format!(
                "no content handler registered for {}",
                options.processing_queue
            ))
        })?;
        handler.process(Value::Object(payload)).await?;
        return Ok(DispatchMode::Direct);
    }

    if options.use_encoding_safe_process_job {
        let body = payload
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        payload.insert("body".to_string(), json!(STANDARD.encode(body.as_bytes())));
        payload.insert(
            "processing_queue".to_string(),
            json!(options.processing_queue),
        );
        ctx.queue
            .enqueue(ENCODING_SAFE_QUEUE, &Value::Object(payload))
            .await?;
        return Ok(DispatchMode::EncodingSafe);
    }

    ctx.queue
        .enqueue(&options.processing_queue, &Value::Object(payload))
        .await?;
    Ok(DispatchMode::Queued)
}

/// Restores the body of an encoding-safe payload
///
/// # Returns
///
/// The target processing queue and the payload with its body decoded
pub fn decode_encoding_safe(payload: &Value) -> Result<(String, Value)> {
    let mut payload = payload.clone();
    let map = payload
        .as_object_mut()
        .ok_or_else(|| SpindleError::Processing("payload is not an object".to_string()))?;

    let queue = map
        .remove("processing_queue")
        .and_then(|q| q.as_str().map(str::to_string))
        .ok_or_else(|| SpindleError::Processing("payload has no processing_queue".to_string()))?;

    let encoded = map.get("body").and_then(Value::as_str).unwrap_or_default();
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| SpindleError::Processing(format!("invalid base64 body: {}", e)))?;
    map.insert(
        "body".to_string(),
        json!(String::from_utf8_lossy(&bytes).into_owned()),
    );

    Ok((queue, payload))
}

/// Builds the completion notification: the statistics snapshot merged with
/// the crawl's identity
///
/// `store_options` is only included when non-empty and `source_id` only
/// when set.
pub fn finished_payload(
    stats: &CrawlStatistics,
    request: &ContentRequest,
    crawled_base_url: Option<String>,
) -> Result<Value> {
    let mut payload = stats.to_payload()?;
    payload.insert("crawl_id".to_string(), json!(request.crawl_id));
    payload.insert("crawled_base_url".to_string(), json!(crawled_base_url));
    if !request.options.store_options.is_empty() {
        payload.insert(
            "store_options".to_string(),
            json!(request.options.store_options),
        );
    }
    if let Some(source_id) = &request.options.source_id {
        payload.insert("source_id".to_string(), json!(source_id));
    }
    Ok(Value::Object(payload))
}
