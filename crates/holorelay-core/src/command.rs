//! Control channel commands
//!
//! One JSON object per line:
//!
//! ```json
//! {"type":"update_color","model_name":"skin","child_name":"血肿","colorR":1,"colorG":0,"colorB":0}
//! ```
//!
//! Recognized types are `update_opacity`, `update_color`, `add_point` and
//! `remove_point`. Any other type decodes to [`Command::Unknown`] so the
//! connection can carry on; lines that are not a JSON object with a string
//! `type` are malformed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const UPDATE_OPACITY: &str = "update_opacity";
pub const UPDATE_COLOR: &str = "update_color";
pub const ADD_POINT: &str = "add_point";
pub const REMOVE_POINT: &str = "remove_point";

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Command is not a JSON object")]
    NotAnObject,
    #[error("Command has no string \"type\" field")]
    MissingType,
    #[error("{kind} command is missing \"{field}\"")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

/// Field-level wire representation of a command line
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireCommand {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f32>,
    #[serde(default, rename = "colorR", skip_serializing_if = "Option::is_none")]
    pub color_r: Option<f32>,
    #[serde(default, rename = "colorG", skip_serializing_if = "Option::is_none")]
    pub color_g: Option<f32>,
    #[serde(default, rename = "colorB", skip_serializing_if = "Option::is_none")]
    pub color_b: Option<f32>,
}

/// A decoded control command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    UpdateOpacity {
        model: String,
        child: String,
        opacity: f32,
    },
    UpdateColor {
        model: String,
        child: String,
        r: f32,
        g: f32,
        b: f32,
    },
    AddPoint,
    RemovePoint,
    /// Well-formed line with a type this server does not handle
    Unknown { kind: String },
}

impl Command {
    /// Decode one line (without its terminator)
    pub fn decode(line: &str) -> Result<Self, CommandError> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        let object = value.as_object().ok_or(CommandError::NotAnObject)?;
        if !matches!(object.get("type"), Some(serde_json::Value::String(_))) {
            return Err(CommandError::MissingType);
        }

        let wire: WireCommand = serde_json::from_value(value)?;
        Self::from_wire(wire)
    }

    /// Convert the field-level form into a command
    ///
    /// Missing numeric fields read as `0.0`.
    pub fn from_wire(wire: WireCommand) -> Result<Self, CommandError> {
        let command = match wire.kind.as_str() {
            UPDATE_OPACITY => Self::UpdateOpacity {
                model: required(UPDATE_OPACITY, "model_name", wire.model_name)?,
                child: required(UPDATE_OPACITY, "child_name", wire.child_name)?,
                opacity: wire.opacity.unwrap_or_default(),
            },
            UPDATE_COLOR => Self::UpdateColor {
                model: required(UPDATE_COLOR, "model_name", wire.model_name)?,
                child: required(UPDATE_COLOR, "child_name", wire.child_name)?,
                r: wire.color_r.unwrap_or_default(),
                g: wire.color_g.unwrap_or_default(),
                b: wire.color_b.unwrap_or_default(),
            },
            ADD_POINT => Self::AddPoint,
            REMOVE_POINT => Self::RemovePoint,
            _ => Self::Unknown { kind: wire.kind },
        };
        Ok(command)
    }

    /// Field-level form, used by senders
    pub fn to_wire(&self) -> WireCommand {
        match self {
            Self::UpdateOpacity {
                model,
                child,
                opacity,
            } => WireCommand {
                kind: UPDATE_OPACITY.to_string(),
                model_name: Some(model.clone()),
                child_name: Some(child.clone()),
                opacity: Some(*opacity),
                ..Default::default()
            },
            Self::UpdateColor {
                model,
                child,
                r,
                g,
                b,
            } => WireCommand {
                kind: UPDATE_COLOR.to_string(),
                model_name: Some(model.clone()),
                child_name: Some(child.clone()),
                color_r: Some(*r),
                color_g: Some(*g),
                color_b: Some(*b),
                ..Default::default()
            },
            Self::AddPoint => WireCommand {
                kind: ADD_POINT.to_string(),
                ..Default::default()
            },
            Self::RemovePoint => WireCommand {
                kind: REMOVE_POINT.to_string(),
                ..Default::default()
            },
            Self::Unknown { kind } => WireCommand {
                kind: kind.clone(),
                ..Default::default()
            },
        }
    }

    /// Encode as one newline-terminated line
    pub fn to_line(&self) -> Result<String, CommandError> {
        let mut line = serde_json::to_string(&self.to_wire())?;
        line.push('\n');
        Ok(line)
    }

    /// Wire type tag
    pub fn kind(&self) -> &str {
        match self {
            Self::UpdateOpacity { .. } => UPDATE_OPACITY,
            Self::UpdateColor { .. } => UPDATE_COLOR,
            Self::AddPoint => ADD_POINT,
            Self::RemovePoint => REMOVE_POINT,
            Self::Unknown { kind } => kind.as_str(),
        }
    }
}

fn required(
    kind: &'static str,
    field: &'static str,
    value: Option<String>,
) -> Result<String, CommandError> {
    value.ok_or(CommandError::MissingField { kind, field })
}
