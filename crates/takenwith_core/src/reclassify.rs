use crate::camera::{Camera, ExifFields};
use crate::disambiguate::DisambiguationRule;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovePlan {
    Move {
        target: &'static str,
        reason: &'static str,
    },
    /// Exif still can't tell the two cameras apart.
    Keep,
    /// The file's Exif names a different camera than the holding category.
    WrongModel,
}

/// Decide where a file in a holding category belongs.
pub fn plan_move(camera: &Camera, exif: &ExifFields, rule: DisambiguationRule) -> MovePlan {
    let series = rule.series();
    if camera.model != series.exif_model {
        return MovePlan::WrongModel;
    }
    let target = rule.resolve(exif);
    if target == series.holding {
        MovePlan::Keep
    } else if exif.has_iso_speed {
        MovePlan::Move {
            target,
            reason: "since Exif contains ISO speed rating",
        }
    } else {
        MovePlan::Move {
            target,
            reason: "since Exif lacks ISO speed rating and predates the PowerShot",
        }
    }
}
