// src/images.rs

use serde::{Deserialize, Serialize};

/// A persisted gantry capture. Field names follow the JSON wire format
/// (camelCase) everywhere: the REST API, the index documents and the outbox
/// snapshots all serialize this same struct.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageCapture {
    pub id: i64,
    pub guid: String,
    pub plate: Option<String>,
    #[serde(default, with = "base64_blob")]
    pub image_lp: Option<Vec<u8>>,
    pub image_lp_content_type: Option<String>,
    #[serde(default, with = "base64_blob")]
    pub image_thumb: Option<Vec<u8>>,
    pub image_thumb_content_type: Option<String>,
    pub anpr: Option<String>,
    pub rfid: Option<String>,
    pub data_status: String,
    pub gantry: i64,
    pub lane: i64,
    pub kph: Option<i64>,
    pub ambush: Option<i64>,
    pub direction: Option<i64>,
    pub vehicle: i64,
    pub issue: Option<String>,
    pub status: Option<String>,
}

/// A validated capture that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImage {
    pub guid: String,
    pub plate: Option<String>,
    pub image_lp: Option<Vec<u8>>,
    pub image_lp_content_type: Option<String>,
    pub image_thumb: Option<Vec<u8>>,
    pub image_thumb_content_type: Option<String>,
    pub anpr: Option<String>,
    pub rfid: Option<String>,
    pub data_status: String,
    pub gantry: i64,
    pub lane: i64,
    pub kph: Option<i64>,
    pub ambush: Option<i64>,
    pub direction: Option<i64>,
    pub vehicle: i64,
    pub issue: Option<String>,
    pub status: Option<String>,
}

impl NewImage {
    pub fn with_id(self, id: i64) -> ImageCapture {
        ImageCapture {
            id,
            guid: self.guid,
            plate: self.plate,
            image_lp: self.image_lp,
            image_lp_content_type: self.image_lp_content_type,
            image_thumb: self.image_thumb,
            image_thumb_content_type: self.image_thumb_content_type,
            anpr: self.anpr,
            rfid: self.rfid,
            data_status: self.data_status,
            gantry: self.gantry,
            lane: self.lane,
            kph: self.kph,
            ambush: self.ambush,
            direction: self.direction,
            vehicle: self.vehicle,
            issue: self.issue,
            status: self.status,
        }
    }
}

/// Request body for POST, PUT and PATCH. Every field is optional so the
/// service can report exactly which required field is missing.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageDto {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub plate: Option<String>,
    #[serde(default, with = "base64_blob")]
    pub image_lp: Option<Vec<u8>>,
    #[serde(default)]
    pub image_lp_content_type: Option<String>,
    #[serde(default, with = "base64_blob")]
    pub image_thumb: Option<Vec<u8>>,
    #[serde(default)]
    pub image_thumb_content_type: Option<String>,
    #[serde(default)]
    pub anpr: Option<String>,
    #[serde(default)]
    pub rfid: Option<String>,
    #[serde(default)]
    pub data_status: Option<String>,
    #[serde(default)]
    pub gantry: Option<i64>,
    #[serde(default)]
    pub lane: Option<i64>,
    #[serde(default)]
    pub kph: Option<i64>,
    #[serde(default)]
    pub ambush: Option<i64>,
    #[serde(default)]
    pub direction: Option<i64>,
    #[serde(default)]
    pub vehicle: Option<i64>,
    #[serde(default)]
    pub issue: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl From<ImageCapture> for ImageDto {
    fn from(image: ImageCapture) -> Self {
        Self {
            id: Some(image.id),
            guid: Some(image.guid),
            plate: image.plate,
            image_lp: image.image_lp,
            image_lp_content_type: image.image_lp_content_type,
            image_thumb: image.image_thumb,
            image_thumb_content_type: image.image_thumb_content_type,
            anpr: image.anpr,
            rfid: image.rfid,
            data_status: Some(image.data_status),
            gantry: Some(image.gantry),
            lane: Some(image.lane),
            kph: image.kph,
            ambush: image.ambush,
            direction: image.direction,
            vehicle: Some(image.vehicle),
            issue: image.issue,
            status: image.status,
        }
    }
}

impl ImageCapture {
    /// Merge-patch: every field present in `patch` overwrites the stored
    /// value, absent (or null) fields are left alone. The id never changes.
    pub fn merge(&mut self, patch: ImageDto) {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *slot = value;
            }
        }
        fn set_opt<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        set(&mut self.guid, patch.guid);
        set_opt(&mut self.plate, patch.plate);
        set_opt(&mut self.image_lp, patch.image_lp);
        set_opt(&mut self.image_lp_content_type, patch.image_lp_content_type);
        set_opt(&mut self.image_thumb, patch.image_thumb);
        set_opt(&mut self.image_thumb_content_type, patch.image_thumb_content_type);
        set_opt(&mut self.anpr, patch.anpr);
        set_opt(&mut self.rfid, patch.rfid);
        set(&mut self.data_status, patch.data_status);
        set(&mut self.gantry, patch.gantry);
        set(&mut self.lane, patch.lane);
        set_opt(&mut self.kph, patch.kph);
        set_opt(&mut self.ambush, patch.ambush);
        set_opt(&mut self.direction, patch.direction);
        set(&mut self.vehicle, patch.vehicle);
        set_opt(&mut self.issue, patch.issue);
        set_opt(&mut self.status, patch.status);
    }
}

/// Blobs travel as standard base64 strings in JSON.
pub mod base64_blob {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn default_dto() -> ImageDto {
        ImageDto {
            id: None,
            guid: Some("AAAAAAAAAA".into()),
            plate: Some("AAAAAAAAAA".into()),
            image_lp: Some(vec![0]),
            image_lp_content_type: Some("image/jpg".into()),
            image_thumb: Some(vec![0]),
            image_thumb_content_type: Some("image/jpg".into()),
            anpr: Some("AAAAAAAAAA".into()),
            rfid: Some("AAAAAAAAAA".into()),
            data_status: Some("AAAAAAAAAA".into()),
            gantry: Some(1),
            lane: Some(1),
            kph: Some(1),
            ambush: Some(1),
            direction: Some(1),
            vehicle: Some(1),
            issue: Some("AAAAAAAAAA".into()),
            status: Some("AAAAAAAAAA".into()),
        }
    }

    pub fn updated_dto(id: i64) -> ImageDto {
        ImageDto {
            id: Some(id),
            guid: Some("BBBBBBBBBB".into()),
            plate: Some("BBBBBBBBBB".into()),
            image_lp: Some(vec![1]),
            image_lp_content_type: Some("image/png".into()),
            image_thumb: Some(vec![1]),
            image_thumb_content_type: Some("image/png".into()),
            anpr: Some("BBBBBBBBBB".into()),
            rfid: Some("BBBBBBBBBB".into()),
            data_status: Some("BBBBBBBBBB".into()),
            gantry: Some(2),
            lane: Some(2),
            kph: Some(2),
            ambush: Some(2),
            direction: Some(2),
            vehicle: Some(2),
            issue: Some("BBBBBBBBBB".into()),
            status: Some("BBBBBBBBBB".into()),
        }
    }

    pub fn new_image() -> NewImage {
        NewImage {
            guid: "AAAAAAAAAA".into(),
            plate: Some("AAAAAAAAAA".into()),
            image_lp: Some(vec![0]),
            image_lp_content_type: Some("image/jpg".into()),
            image_thumb: Some(vec![0]),
            image_thumb_content_type: Some("image/jpg".into()),
            anpr: Some("AAAAAAAAAA".into()),
            rfid: Some("AAAAAAAAAA".into()),
            data_status: "AAAAAAAAAA".into(),
            gantry: 1,
            lane: 1,
            kph: Some(1),
            ambush: Some(1),
            direction: Some(1),
            vehicle: 1,
            issue: Some("AAAAAAAAAA".into()),
            status: Some("AAAAAAAAAA".into()),
        }
    }
}
