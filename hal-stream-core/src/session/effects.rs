use crate::traits::engine::PreprocessEffect;

/// Capture effect toggled by the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    EchoCanceller,
    NoiseSuppressor,
}

/// Echo-cancellation / noise-suppression state of a voice-communication capture.
///
/// The engine only knows combined effect ids, so every toggle is translated
/// into the single engine call that reaches the new combined state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreprocessState {
    ec: bool,
    ns: bool,
    applied: bool,
}

impl PreprocessState {
    pub fn echo_cancellation(&self) -> bool {
        self.ec
    }

    pub fn noise_suppression(&self) -> bool {
        self.ns
    }

    pub fn is_applied(&self) -> bool {
        self.applied
    }

    pub fn mark_applied(&mut self, applied: bool) {
        self.applied = applied;
    }

    /// Update the state and return the engine call for it, or `None` when
    /// the request does not change anything.
    pub fn toggle(&mut self, kind: EffectKind, enable: bool) -> Option<(PreprocessEffect, bool)> {
        let (this, other) = match kind {
            EffectKind::EchoCanceller => (self.ec, self.ns),
            EffectKind::NoiseSuppressor => (self.ns, self.ec),
        };
        if this == enable {
            log::debug!("{:?} already {}", kind, if enable { "enabled" } else { "disabled" });
            return None;
        }

        let action = match (enable, other) {
            (true, true) => (PreprocessEffect::EchoCancellationNoiseSuppression, true),
            (true, false) => (single(kind), true),
            (false, true) => (single(other_kind(kind)), true),
            (false, false) => (PreprocessEffect::EchoCancellationNoiseSuppression, false),
        };
        match kind {
            EffectKind::EchoCanceller => self.ec = enable,
            EffectKind::NoiseSuppressor => self.ns = enable,
        }
        self.applied = false;
        Some(action)
    }

    /// Engine call that establishes the current combined state from scratch.
    pub fn pending_action(&self) -> (PreprocessEffect, bool) {
        match (self.ec, self.ns) {
            (true, true) => (PreprocessEffect::EchoCancellationNoiseSuppression, true),
            (true, false) => (PreprocessEffect::EchoCancellation, true),
            (false, true) => (PreprocessEffect::NoiseSuppression, true),
            (false, false) => (PreprocessEffect::EchoCancellationNoiseSuppression, false),
        }
    }

    /// Whether a freshly opened session needs an effect call at all.
    pub fn needs_apply(&self) -> bool {
        !self.applied && (self.ec || self.ns)
    }
}

fn single(kind: EffectKind) -> PreprocessEffect {
    match kind {
        EffectKind::EchoCanceller => PreprocessEffect::EchoCancellation,
        EffectKind::NoiseSuppressor => PreprocessEffect::NoiseSuppression,
    }
}

fn other_kind(kind: EffectKind) -> EffectKind {
    match kind {
        EffectKind::EchoCanceller => EffectKind::NoiseSuppressor,
        EffectKind::NoiseSuppressor => EffectKind::EchoCanceller,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_ec_alone() {
        let mut state = PreprocessState::default();
        assert_eq!(
            state.toggle(EffectKind::EchoCanceller, true),
            Some((PreprocessEffect::EchoCancellation, true))
        );
        assert!(state.echo_cancellation());
        assert!(state.needs_apply());
    }

    #[test]
    fn enable_ns_with_ec_combines() {
        let mut state = PreprocessState::default();
        state.toggle(EffectKind::EchoCanceller, true);
        assert_eq!(
            state.toggle(EffectKind::NoiseSuppressor, true),
            Some((PreprocessEffect::EchoCancellationNoiseSuppression, true))
        );
    }

    #[test]
    fn disable_ec_keeps_ns() {
        let mut state = PreprocessState::default();
        state.toggle(EffectKind::EchoCanceller, true);
        state.toggle(EffectKind::NoiseSuppressor, true);
        assert_eq!(
            state.toggle(EffectKind::EchoCanceller, false),
            Some((PreprocessEffect::NoiseSuppression, true))
        );
        assert_eq!(state.pending_action(), (PreprocessEffect::NoiseSuppression, true));
    }

    #[test]
    fn disable_last_effect_turns_everything_off() {
        let mut state = PreprocessState::default();
        state.toggle(EffectKind::NoiseSuppressor, true);
        assert_eq!(
            state.toggle(EffectKind::NoiseSuppressor, false),
            Some((PreprocessEffect::EchoCancellationNoiseSuppression, false))
        );
        assert!(!state.needs_apply());
    }

    #[test]
    fn repeated_request_is_noop() {
        let mut state = PreprocessState::default();
        assert_eq!(state.toggle(EffectKind::NoiseSuppressor, false), None);
        state.toggle(EffectKind::NoiseSuppressor, true);
        assert_eq!(state.toggle(EffectKind::NoiseSuppressor, true), None);
    }
}
