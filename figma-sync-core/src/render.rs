//! Render fetching: one batched render request per run, then one download
//! per node.

use std::collections::HashMap;

use tracing::{error, info};

use crate::config::ImageFormat;
use crate::contract::{RenderApi, RenderSource};
use crate::error::ExportError;

/// Fetches the document's current version token. Called after every sync so
/// renders never come from a pre-sync edit state.
pub async fn fetch_version<A>(api: &A, file_key: &str) -> Result<String, ExportError>
where
    A: RenderApi + ?Sized,
{
    let version = api.file_version(file_key).await?;
    info!(file_key, version = %version, "[RENDER] Fetched document version");
    Ok(version)
}

/// Requests render URLs for all `node_ids` in a single call.
///
/// Returns exactly one [`RenderSource`] per requested node, in request order.
/// A node the provider left out or could not render fails the whole request
/// with [`ExportError::RemoteApi`].
pub async fn fetch_renders<A>(
    api: &A,
    file_key: &str,
    node_ids: &[String],
    version: &str,
    format: ImageFormat,
) -> Result<Vec<RenderSource>, ExportError>
where
    A: RenderApi + ?Sized,
{
    info!(
        file_key,
        nodes = node_ids.len(),
        version,
        format = format.as_str(),
        "[RENDER] Requesting renders"
    );
    let images = api.image_urls(file_key, node_ids, version, format).await?;
    order_renders(node_ids, images)
}

fn order_renders(
    node_ids: &[String],
    images: HashMap<String, Option<String>>,
) -> Result<Vec<RenderSource>, ExportError> {
    let mut renders = Vec::with_capacity(node_ids.len());
    for node_id in node_ids {
        match images.get(node_id) {
            Some(Some(source_url)) => renders.push(RenderSource {
                node_id: node_id.clone(),
                source_url: source_url.clone(),
            }),
            Some(None) => {
                error!(node_id = %node_id, "[RENDER] Provider failed to render node");
                return Err(ExportError::remote_api(
                    None,
                    format!("provider returned no render for node {node_id}"),
                ));
            }
            None => {
                error!(node_id = %node_id, "[RENDER] Node missing from render response");
                return Err(ExportError::remote_api(
                    None,
                    format!("render response has no entry for node {node_id}"),
                ));
            }
        }
    }
    Ok(renders)
}

/// Downloads one render. No retry: a failed download fails the run.
pub async fn download_image<A>(api: &A, source: &RenderSource) -> Result<Vec<u8>, ExportError>
where
    A: RenderApi + ?Sized,
{
    let bytes = api.download(&source.source_url).await?;
    info!(node_id = %source.node_id, size = bytes.len(), "[RENDER] Downloaded render");
    Ok(bytes)
}
