use crate::{detection::DetectionInstance, response::RejectionReason, species::SpeciesProfile};

/// Rejects when nothing was detected, then when no detected class is one of
/// the species' liver classes.
pub fn validate_instances(
    profile: &SpeciesProfile,
    instances: &[DetectionInstance],
) -> Result<(), RejectionReason> {
    if instances.is_empty() {
        return Err(RejectionReason::NoInstances);
    }

    if !instances
        .iter()
        .any(|instance| profile.is_liver_class(&instance.class_name))
    {
        return Err(RejectionReason::NoLiverClass);
    }

    Ok(())
}
