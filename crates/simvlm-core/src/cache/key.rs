//! Cache key generation.
//!
//! A key is a compact JSON object holding every model parameter plus the
//! fields that identify the input. Fields are always emitted in name order,
//! so equal inputs produce byte-identical keys across calls and processes.
//!
//! A parameter named like one of the input fields is emitted as
//! `param.<name>` instead, so the input can never overwrite it.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::types::{ParamValue, ParameterSet};

/// Field holding the text of a text query.
pub const TEXT_FIELD: &str = "text";
/// Field holding the path of a video query.
pub const VIDEO_PATH_FIELD: &str = "video_path";
/// Field holding the first frame of a sub-video query.
pub const START_FRAME_FIELD: &str = "subvideo_start_frame";
/// Field holding the end frame of a sub-video query.
pub const END_FRAME_FIELD: &str = "subvideo_end_frame";

const INPUT_FIELDS: [&str; 4] = [TEXT_FIELD, VIDEO_PATH_FIELD, START_FRAME_FIELD, END_FRAME_FIELD];
const RENAMED_PARAM_PREFIX: &str = "param.";

/// Key for a text embedding.
pub fn text_cache_key(params: &ParameterSet, text: &str) -> String {
    let mut fields = param_fields(params);
    fields.insert(TEXT_FIELD.to_string(), Value::from(text));
    render(fields)
}

/// Key for a (sub-)video embedding.
///
/// Frame bounds only appear when at least one is set. Whole-video keys
/// therefore carry no frame fields at all, and a bounded query can never
/// collide with the unbounded one, even if its range spans the whole video.
pub fn video_cache_key(
    params: &ParameterSet,
    video_path: &str,
    start: Option<u64>,
    end: Option<u64>,
) -> String {
    let mut fields = param_fields(params);
    fields.insert(VIDEO_PATH_FIELD.to_string(), Value::from(video_path));
    if start.is_some() || end.is_some() {
        fields.insert(START_FRAME_FIELD.to_string(), Value::from(start));
        fields.insert(END_FRAME_FIELD.to_string(), Value::from(end));
    }
    render(fields)
}

fn param_fields(params: &ParameterSet) -> BTreeMap<String, Value> {
    params
        .iter()
        .map(|(name, value)| (field_name(params, name), param_to_json(value)))
        .collect()
}

fn field_name(params: &ParameterSet, name: &str) -> String {
    if !INPUT_FIELDS.contains(&name) {
        return name.to_string();
    }
    let mut renamed = format!("{RENAMED_PARAM_PREFIX}{name}");
    while params.get(&renamed).is_some() {
        renamed.insert_str(0, RENAMED_PARAM_PREFIX);
    }
    renamed
}

fn param_to_json(value: &ParamValue) -> Value {
    match value {
        ParamValue::Bool(v) => Value::Bool(*v),
        ParamValue::Int(v) => Value::from(*v),
        ParamValue::Float(v) => Value::from(*v),
        ParamValue::Str(v) => Value::from(v.as_str()),
    }
}

// Inserting from a BTreeMap keeps name order whether or not serde_json's
// `preserve_order` feature is enabled somewhere in the build.
fn render(fields: BTreeMap<String, Value>) -> String {
    Value::Object(fields.into_iter().collect()).to_string()
}
