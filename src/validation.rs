use crate::error::AppError;
use crate::images::{ImageDto, NewImage};

/// Checks a POST body and turns it into an insertable record.
///
/// Required fields are checked in column order so the reported field is
/// stable: `guid`, `dataStatus`, `gantry`, `lane`, `vehicle`.
pub fn validate_for_create(dto: ImageDto) -> Result<NewImage, AppError> {
    if dto.id.is_some() {
        return Err(AppError::IdentifierConflict);
    }
    require_complete(dto)
}

/// Path and body ids must both be present and agree. Existence of the
/// target is checked by the service against the record store.
pub fn check_identifiers(path_id: i64, dto: &ImageDto) -> Result<(), AppError> {
    match dto.id {
        None => Err(AppError::IdentifierMissing),
        Some(body) if body != path_id => Err(AppError::IdentifierMismatch {
            path: path_id,
            body,
        }),
        Some(_) => Ok(()),
    }
}

/// Full-replace bodies (POST and PUT) must carry every required field.
pub fn require_complete(dto: ImageDto) -> Result<NewImage, AppError> {
    check_content_types(&dto)?;

    let guid = dto.guid.ok_or_else(|| AppError::missing("guid"))?;
    let data_status = dto.data_status.ok_or_else(|| AppError::missing("dataStatus"))?;
    let gantry = dto.gantry.ok_or_else(|| AppError::missing("gantry"))?;
    let lane = dto.lane.ok_or_else(|| AppError::missing("lane"))?;
    let vehicle = dto.vehicle.ok_or_else(|| AppError::missing("vehicle"))?;

    Ok(NewImage {
        guid,
        plate: dto.plate,
        image_lp: dto.image_lp,
        image_lp_content_type: dto.image_lp_content_type,
        image_thumb: dto.image_thumb,
        image_thumb_content_type: dto.image_thumb_content_type,
        anpr: dto.anpr,
        rfid: dto.rfid,
        data_status,
        gantry,
        lane,
        kph: dto.kph,
        ambush: dto.ambush,
        direction: dto.direction,
        vehicle,
        issue: dto.issue,
        status: dto.status,
    })
}

pub fn check_content_types(dto: &ImageDto) -> Result<(), AppError> {
    check_content_type("imageLpContentType", dto.image_lp_content_type.as_deref())?;
    check_content_type("imageThumbContentType", dto.image_thumb_content_type.as_deref())
}

fn check_content_type(field: &'static str, value: Option<&str>) -> Result<(), AppError> {
    let Some(value) = value else {
        return Ok(());
    };
    match value.parse::<mime::Mime>() {
        Ok(_) => Ok(()),
        Err(e) => {
            log::debug!("Rejecting content type {:?} for {}: {}", value, field, e);
            Err(AppError::Validation {
                field,
                reason: "is not a valid content type",
            })
        }
    }
}
