//! Backend `/history/{prompt_id}` response.
//!
//! Depending on the backend version the outputs arrive wrapped in the prompt
//! id (`{"<id>": {"outputs": ...}}`) or directly (`{"outputs": ...}`).

use comfyui_mini_domain::{OutputFile, OutputImageMap};
use serde_json::{Map, Value};

/// Output lists read per node, in the order they are added to the map.
const FILE_LISTS: [&str; 3] = ["images", "videos", "gifs"];

/// Locate the per-node outputs of `prompt_id` in a history response.
///
/// `None` means the backend has not recorded any outputs yet.
pub fn extract_outputs<'a>(history: &'a Value, prompt_id: &str) -> Option<&'a Map<String, Value>> {
    history
        .get(prompt_id)
        .and_then(|entry| entry.get("outputs"))
        .or_else(|| history.get("outputs"))
        .and_then(Value::as_object)
}

/// Build the node id to proxied URL map for `outputs`.
///
/// Images come first for each node, then videos and gifs. File entries that
/// do not have the `{filename, subfolder, type}` shape are skipped.
pub fn build_output_map(outputs: &Map<String, Value>, proxy_prefix: &str) -> OutputImageMap {
    let mut map = OutputImageMap::new();
    for (node_id, node_output) in outputs {
        for list in FILE_LISTS {
            let Some(files) = node_output.get(list).and_then(Value::as_array) else {
                continue;
            };
            let urls = files.iter().filter_map(|file| {
                match serde_json::from_value::<OutputFile>(file.clone()) {
                    Ok(file) => Some(file.proxy_url(proxy_prefix)),
                    Err(e) => {
                        tracing::warn!(node_id = %node_id, list, error = %e, "Skipping unreadable output file");
                        None
                    }
                }
            });
            map.extend_node(node_id.as_str(), urls);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs() -> Value {
        json!({
            "9": {
                "images": [
                    {"filename": "ComfyUI_00001_.png", "subfolder": "", "type": "output"},
                    {"filename": "ComfyUI_00002_.png", "subfolder": "batch", "type": "output"}
                ]
            },
            "12": {
                "videos": [{"filename": "clip.mp4", "subfolder": "", "type": "output"}],
                "images": [{"filename": "poster.png", "subfolder": "", "type": "temp"}]
            },
            "15": {"text": ["not a file list"]}
        })
    }

    #[test]
    fn wrapped_and_direct_shapes_give_the_same_map() {
        let wrapped = json!({"p1": {"outputs": outputs(), "status": {"completed": true}}});
        let direct = json!({"outputs": outputs()});

        let from_wrapped = build_output_map(extract_outputs(&wrapped, "p1").unwrap(), "comfyui");
        let from_direct = build_output_map(extract_outputs(&direct, "p1").unwrap(), "comfyui");

        assert_eq!(from_wrapped, from_direct);
        assert_eq!(from_wrapped.total_count(), 4);
    }

    #[test]
    fn images_precede_videos_within_a_node() {
        let map = build_output_map(outputs().as_object().unwrap(), "comfyui");
        assert_eq!(
            map.get("12").unwrap(),
            [
                "/comfyui/image?filename=poster.png&type=temp",
                "/comfyui/image?filename=clip.mp4&type=output"
            ]
        );
        assert_eq!(
            map.get("9").unwrap()[1],
            "/comfyui/image?filename=ComfyUI_00002_.png&subfolder=batch&type=output"
        );
        assert!(map.get("15").is_none());
    }

    #[test]
    fn missing_outputs_are_none() {
        assert!(extract_outputs(&json!({}), "p1").is_none());
        assert!(extract_outputs(&json!({"p1": {"status": {}}}), "p1").is_none());
        assert!(extract_outputs(&json!({"other": {"outputs": {}}}), "p1").is_none());
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let outputs = json!({
            "9": {"images": [{"subfolder": ""}, {"filename": "ok.png", "type": "output"}]}
        });
        let map = build_output_map(outputs.as_object().unwrap(), "comfyui");
        assert_eq!(map.total_count(), 1);
    }
}
