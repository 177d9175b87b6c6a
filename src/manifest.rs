//! Manifest model (§3, §4.D): the per-device tool vocabulary, loaded once
//! from `<manifest_dir>/<device_id>.json` after a successful handshake.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ManifestError;
use crate::wire::types::WireType;

/// On-disk manifest schema (§6), deserialized directly from JSON.
#[derive(Debug, Deserialize)]
struct ManifestDoc {
    name: String,
    description: String,
    version: String,
    functions: Vec<FunctionDoc>,
}

#[derive(Debug, Deserialize)]
struct FunctionDoc {
    tag: u16,
    name: String,
    desc: String,
    #[serde(rename = "return")]
    return_type: Option<WireTypeDoc>,
    #[serde(default)]
    params: Vec<ParamDoc>,
}

#[derive(Debug, Deserialize)]
struct ParamDoc {
    name: String,
    #[serde(rename = "type")]
    ty: WireTypeDoc,
}

/// Matches the manifest JSON's lowercase type spellings, distinct from the
/// wire codec's own [`WireType`] enum (which is never `void` except as a
/// return type).
#[derive(Debug, Clone, Copy, Deserialize)]
enum WireTypeDoc {
    #[serde(rename = "i16")]
    I16,
    #[serde(rename = "i32")]
    I32,
    #[serde(rename = "CStr")]
    CStr,
}

impl From<WireTypeDoc> for WireType {
    fn from(d: WireTypeDoc) -> WireType {
        match d {
            WireTypeDoc::I16 => WireType::I16,
            WireTypeDoc::I32 => WireType::I32,
            WireTypeDoc::CStr => WireType::CStr,
        }
    }
}

/// The reserved device-identification tool name and tag (§3, §4.F).
pub const DEVICE_ID_TOOL_NAME: &str = "deviceId";
pub const DEVICE_ID_TAG: u8 = 0;

/// One entry in a manifest's tool list (§3).
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub tag: u8,
    pub name: String,
    pub description: String,
    pub return_type: Option<WireType>,
    pub parameters: Vec<(String, WireType)>,
}

/// A validated, immutable per-device tool manifest (§3, §4.D).
#[derive(Debug, Clone)]
pub struct Manifest {
    pub name: String,
    pub description: String,
    pub version: String,
    tools: Vec<ToolDescriptor>,
    by_name: HashMap<String, usize>,
    by_tag: HashMap<u8, usize>,
}

impl Manifest {
    /// Reads and validates the manifest at `path` (§4.D).
    pub fn load(path: &Path) -> Result<Manifest, ManifestError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let doc: ManifestDoc =
            serde_json::from_str(&raw).map_err(|source| ManifestError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Manifest::from_doc(doc)
    }

    fn from_doc(doc: ManifestDoc) -> Result<Manifest, ManifestError> {
        let mut tools = Vec::with_capacity(doc.functions.len());
        let mut by_name = HashMap::with_capacity(doc.functions.len());
        let mut by_tag = HashMap::with_capacity(doc.functions.len());

        for f in doc.functions {
            let tag: u8 = f
                .tag
                .try_into()
                .map_err(|_| ManifestError::Invalid(format!("tag {} out of range [0,255]", f.tag)))?;

            if f.name.is_empty() {
                return Err(ManifestError::Invalid("tool name must be non-empty".into()));
            }
            if by_name.contains_key(&f.name) {
                return Err(ManifestError::Invalid(format!(
                    "duplicate tool name {:?}",
                    f.name
                )));
            }
            if by_tag.contains_key(&tag) {
                return Err(ManifestError::Invalid(format!("duplicate tag {tag}")));
            }

            let mut seen_params = std::collections::HashSet::with_capacity(f.params.len());
            let mut parameters = Vec::with_capacity(f.params.len());
            for p in f.params {
                if !seen_params.insert(p.name.clone()) {
                    return Err(ManifestError::Invalid(format!(
                        "duplicate parameter name {:?} in tool {:?}",
                        p.name, f.name
                    )));
                }
                parameters.push((p.name, p.ty.into()));
            }

            if tag == DEVICE_ID_TAG {
                let is_device_id_shape = f.name == DEVICE_ID_TOOL_NAME
                    && matches!(f.return_type, Some(WireTypeDoc::CStr))
                    && parameters.is_empty();
                if !is_device_id_shape {
                    return Err(ManifestError::Invalid(format!(
                        "tag 0 must name {DEVICE_ID_TOOL_NAME:?} with return type CStr and no parameters, found {:?}",
                        f.name
                    )));
                }
            }

            let index = tools.len();
            by_name.insert(f.name.clone(), index);
            by_tag.insert(tag, index);
            tools.push(ToolDescriptor {
                tag,
                name: f.name,
                description: f.desc,
                return_type: f.return_type.map(Into::into),
                parameters,
            });
        }

        Ok(Manifest {
            name: doc.name,
            description: doc.description,
            version: doc.version,
            tools,
            by_name,
            by_tag,
        })
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn by_name(&self, name: &str) -> Result<&ToolDescriptor, ManifestError> {
        self.by_name
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| ManifestError::UnknownName(name.to_string()))
    }

    pub fn by_tag(&self, tag: u8) -> Result<&ToolDescriptor, ManifestError> {
        self.by_tag
            .get(&tag)
            .map(|&i| &self.tools[i])
            .ok_or(ManifestError::UnknownTag(tag))
    }
}
