//! Instrumental selection from whatever stems separation returned

use crate::error::{PipelineError, PipelineResult};
use crate::reference::StemKind;

/// Stems that make up a full instrumental when no `instrumental` stem exists
pub const ACCOMPANIMENT_STEMS: [StemKind; 3] = [StemKind::Drums, StemKind::Bass, StemKind::Other];

/// Which stems become the instrumental
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentalPlan {
    /// A single complete instrumental stem
    Single(StemKind),
    /// Several stems to be mixed later, in this order
    Stems(Vec<StemKind>),
    /// Only a partial stem is available; result quality is reduced
    Degraded(StemKind),
}

impl InstrumentalPlan {
    pub fn stems(&self) -> Vec<StemKind> {
        match self {
            InstrumentalPlan::Single(kind) | InstrumentalPlan::Degraded(kind) => vec![*kind],
            InstrumentalPlan::Stems(kinds) => kinds.clone(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, InstrumentalPlan::Degraded(_))
    }
}

/// Apply the fallback chain, strict priority:
///
/// 1. `instrumental` present → use it
/// 2. `drums`, `bass` and `other` all present → mix all three
/// 3. only `other` present → use it, flagged degraded
/// 4. otherwise → `MissingStems`
///
/// `vocals` is mandatory regardless.
pub fn plan_instrumental(available: &[StemKind]) -> PipelineResult<InstrumentalPlan> {
    let has = |kind: StemKind| available.contains(&kind);

    if !has(StemKind::Vocals) {
        return Err(PipelineError::MissingStems(format!(
            "separation returned no vocals (got {})",
            describe(available)
        )));
    }

    if has(StemKind::Instrumental) {
        return Ok(InstrumentalPlan::Single(StemKind::Instrumental));
    }

    if ACCOMPANIMENT_STEMS.iter().all(|kind| has(*kind)) {
        return Ok(InstrumentalPlan::Stems(ACCOMPANIMENT_STEMS.to_vec()));
    }

    if has(StemKind::Other) {
        return Ok(InstrumentalPlan::Degraded(StemKind::Other));
    }

    Err(PipelineError::MissingStems(format!(
        "no usable instrumental (got {})",
        describe(available)
    )))
}

fn describe(available: &[StemKind]) -> String {
    if available.is_empty() {
        return "nothing".to_string();
    }
    available
        .iter()
        .map(StemKind::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use StemKind::*;

    #[test]
    fn test_instrumental_stem_wins() {
        let plan = plan_instrumental(&[Vocals, Instrumental, Drums, Bass, Other]).unwrap();
        assert_eq!(plan, InstrumentalPlan::Single(Instrumental));
        assert!(!plan.is_degraded());
    }

    #[test]
    fn test_full_accompaniment_becomes_stem_set() {
        let plan = plan_instrumental(&[Other, Vocals, Bass, Drums]).unwrap();
        assert_eq!(plan, InstrumentalPlan::Stems(vec![Drums, Bass, Other]));
    }

    #[test]
    fn test_other_only_is_degraded() {
        let plan = plan_instrumental(&[Vocals, Other]).unwrap();
        assert_eq!(plan, InstrumentalPlan::Degraded(Other));
        assert!(plan.is_degraded());

        let plan = plan_instrumental(&[Vocals, Drums, Other]).unwrap();
        assert_eq!(plan, InstrumentalPlan::Degraded(Other));
    }

    #[test]
    fn test_missing_vocals_fails() {
        let err = plan_instrumental(&[Instrumental]).unwrap_err();
        assert!(matches!(err, PipelineError::MissingStems(_)));
    }

    #[test]
    fn test_bass_only_fails() {
        let err = plan_instrumental(&[Vocals, Bass]).unwrap_err();
        assert!(matches!(err, PipelineError::MissingStems(_)));
        assert!(err.to_string().contains("vocals, bass"));
    }
}
