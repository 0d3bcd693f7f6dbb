//! Player appearance records and their text wire form.
//!
//! A record is eight `|`-separated fields, each base64 of its UTF-8 text:
//!
//! ```text
//! root | prefab | mesh | materials | class | id | skin | stats
//! ```
//!
//! `materials` is a comma-joined list where each entry is base64 on its own.
//! An empty field is an empty list, so a list holding a single empty name
//! decodes as no materials. `id` is the decimal character id. `stats` is
//! `key=value` pairs joined by `;`, floats in their shortest round-trip form.
//! Missing trailing fields decode as empty (or `-1` for the id) so shorter
//! records from older builds still apply.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

const FIELD_SEPARATOR: char = '|';
const MATERIAL_SEPARATOR: char = ',';
const FIELD_COUNT: usize = 8;
const FIELD_NAMES: [&str; FIELD_COUNT] = [
    "root", "prefab", "mesh", "materials", "class", "id", "skin", "stats",
];

/// Character id meaning "nothing selected yet".
pub const NO_CHARACTER: i32 = -1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AppearanceError {
    #[error("empty appearance payload")]
    Empty,
    #[error("appearance payload has {0} fields, expected at most 8")]
    TooManyFields(usize),
    #[error("appearance field '{field}' is not valid base64 text")]
    InvalidField { field: &'static str },
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Numeric character stats keyed by stat id. Empty means "none sent".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatSnapshot {
    pub values: BTreeMap<i32, f32>,
}

impl StatSnapshot {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn insert(&mut self, key: i32, value: f32) {
        self.values.insert(key, value);
    }

    fn to_text(&self) -> String {
        self.values
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Malformed pairs are skipped.
    fn from_text(text: &str) -> Self {
        let values = text
            .split(';')
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                Some((key.trim().parse().ok()?, value.trim().parse().ok()?))
            })
            .collect();
        Self { values }
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Everything a remote machine needs to build a player's avatar.
#[derive(Debug, Clone, PartialEq)]
pub struct AppearanceDescriptor {
    pub root_path: String,
    pub prefab_name: String,
    pub mesh_name: String,
    pub material_names: Vec<String>,
    pub character_class: String,
    /// Selected character, or [`NO_CHARACTER`].
    pub character_id: i32,
    pub skin_name: String,
    pub stats: StatSnapshot,
}

impl Default for AppearanceDescriptor {
    fn default() -> Self {
        Self {
            root_path: String::new(),
            prefab_name: String::new(),
            mesh_name: String::new(),
            material_names: Vec::new(),
            character_class: String::new(),
            character_id: NO_CHARACTER,
            skin_name: String::new(),
            stats: StatSnapshot::default(),
        }
    }
}

impl AppearanceDescriptor {
    /// Whether the player has picked a character. Drives readiness.
    pub fn has_character(&self) -> bool {
        self.character_id >= 0
    }

    /// Records with no mesh and no character carry nothing worth sending.
    pub fn is_placeholder(&self) -> bool {
        self.mesh_name.is_empty() && !self.has_character()
    }

    /// Two records describe the same avatar when character and skin agree.
    pub fn matches(&self, other: &AppearanceDescriptor) -> bool {
        self.character_id == other.character_id && self.skin_name == other.skin_name
    }

    pub fn serialize(&self) -> String {
        let materials = self
            .material_names
            .iter()
            .map(|name| STANDARD.encode(name))
            .collect::<Vec<_>>()
            .join(&MATERIAL_SEPARATOR.to_string());

        let fields = [
            STANDARD.encode(&self.root_path),
            STANDARD.encode(&self.prefab_name),
            STANDARD.encode(&self.mesh_name),
            materials,
            STANDARD.encode(&self.character_class),
            STANDARD.encode(self.character_id.to_string()),
            STANDARD.encode(&self.skin_name),
            STANDARD.encode(self.stats.to_text()),
        ];
        fields.join(&FIELD_SEPARATOR.to_string())
    }

    pub fn deserialize(payload: &str) -> Result<Self, AppearanceError> {
        if payload.is_empty() {
            return Err(AppearanceError::Empty);
        }
        let fields: Vec<&str> = payload.split(FIELD_SEPARATOR).collect();
        if fields.len() > FIELD_COUNT {
            return Err(AppearanceError::TooManyFields(fields.len()));
        }
        let field = |index: usize| fields.get(index).copied().unwrap_or("");

        let materials = match field(3) {
            "" => Vec::new(),
            list => list
                .split(MATERIAL_SEPARATOR)
                .map(|entry| decode_text(entry, 3))
                .collect::<Result<Vec<_>, _>>()?,
        };

        let character_id = decode_text(field(5), 5)?
            .trim()
            .parse()
            .unwrap_or(NO_CHARACTER);

        Ok(Self {
            root_path: decode_text(field(0), 0)?,
            prefab_name: decode_text(field(1), 1)?,
            mesh_name: decode_text(field(2), 2)?,
            material_names: materials,
            character_class: decode_text(field(4), 4)?,
            character_id,
            skin_name: decode_text(field(6), 6)?,
            stats: StatSnapshot::from_text(&decode_text(field(7), 7)?),
        })
    }
}

fn decode_text(encoded: &str, index: usize) -> Result<String, AppearanceError> {
    if encoded.is_empty() {
        return Ok(String::new());
    }
    let invalid = || AppearanceError::InvalidField {
        field: FIELD_NAMES[index],
    };
    let bytes = STANDARD.decode(encoded).map_err(|_| invalid())?;
    String::from_utf8(bytes).map_err(|_| invalid())
}
