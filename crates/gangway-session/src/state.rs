// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pure state transitions for one session.
//!
//! Two orthogonal axes: `activity` is the user-observable status, `query`
//! drives the runtime guard rails. All transitions are free functions over
//! the plain [`RuntimeState`] record; the session serializes access, the
//! functions themselves hold no state.
//!
//! The generation counter is the kill fence: a kill increments it, and any
//! event observed by the query runtime under a stale generation is dropped
//! instead of applied to the reset session.

use strum::Display;

/// User-visible status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Activity {
    #[default]
    Idle,
    Working,
    Waiting,
}

/// Internal lifecycle of one provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum QueryPhase {
    #[default]
    Idle,
    Preparing,
    Running,
    Aborting,
    Completing,
}

/// The full session state record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeState {
    pub activity: Activity,
    pub query: QueryPhase,
    pub stop_requested: bool,
    pub interrupt_pending: bool,
    pub is_interrupting: bool,
    pub generation: u64,
}

pub fn start_processing(s: RuntimeState) -> RuntimeState {
    RuntimeState {
        query: QueryPhase::Preparing,
        ..s
    }
}

pub fn start_query(s: RuntimeState) -> RuntimeState {
    RuntimeState {
        query: QueryPhase::Running,
        stop_requested: false,
        ..s
    }
}

pub fn complete_query(s: RuntimeState) -> RuntimeState {
    RuntimeState {
        query: QueryPhase::Completing,
        ..s
    }
}

pub fn finalize_query(s: RuntimeState) -> RuntimeState {
    RuntimeState {
        query: QueryPhase::Idle,
        ..s
    }
}

/// Early abort out of `preparing`, before the provider call started.
pub fn stop_processing(s: RuntimeState) -> RuntimeState {
    RuntimeState {
        query: QueryPhase::Idle,
        ..s
    }
}

pub fn request_stop_during_running(s: RuntimeState) -> RuntimeState {
    RuntimeState {
        stop_requested: true,
        query: QueryPhase::Aborting,
        ..s
    }
}

/// Stop requested while still preparing: the flag is set, the phase stays,
/// and the query must not start.
pub fn request_stop_during_preparing(s: RuntimeState) -> RuntimeState {
    RuntimeState {
        stop_requested: true,
        ..s
    }
}

pub fn clear_stop_requested(s: RuntimeState) -> RuntimeState {
    RuntimeState {
        stop_requested: false,
        ..s
    }
}

pub fn mark_interrupt_flag(s: RuntimeState) -> RuntimeState {
    RuntimeState {
        interrupt_pending: true,
        ..s
    }
}

/// Returns whether an interrupt was pending; consuming it clears both the
/// interrupt flag and any stop request.
pub fn consume_interrupt_flag(s: RuntimeState) -> (bool, RuntimeState) {
    if s.interrupt_pending {
        (
            true,
            RuntimeState {
                interrupt_pending: false,
                stop_requested: false,
                ..s
            },
        )
    } else {
        (false, s)
    }
}

/// Idempotent: returns whether the interrupt actually started.
pub fn begin_interrupt(s: RuntimeState) -> (bool, RuntimeState) {
    if s.is_interrupting {
        (false, s)
    } else {
        (
            true,
            RuntimeState {
                is_interrupting: true,
                ..s
            },
        )
    }
}

pub fn end_interrupt(s: RuntimeState) -> RuntimeState {
    RuntimeState {
        is_interrupting: false,
        ..s
    }
}

pub fn increment_generation(s: RuntimeState) -> RuntimeState {
    RuntimeState {
        generation: s.generation + 1,
        ..s
    }
}

/// Resets everything except the monotonic generation, which a kill has
/// already advanced.
pub fn reset_after_kill(s: RuntimeState) -> RuntimeState {
    RuntimeState {
        generation: s.generation,
        ..RuntimeState::default()
    }
}

pub fn is_query_running(s: RuntimeState) -> bool {
    s.query != QueryPhase::Idle
}

pub fn is_query_processing(s: RuntimeState) -> bool {
    matches!(
        s.query,
        QueryPhase::Preparing | QueryPhase::Running | QueryPhase::Completing
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn query_lifecycle_walks_the_phases() {
        let s = RuntimeState::default();
        let s = start_processing(s);
        assert_eq!(s.query, QueryPhase::Preparing);
        assert!(is_query_running(s));
        assert!(is_query_processing(s));

        let s = start_query(s);
        assert_eq!(s.query, QueryPhase::Running);
        assert!(!s.stop_requested);

        let s = complete_query(s);
        assert_eq!(s.query, QueryPhase::Completing);
        assert!(is_query_processing(s));

        let s = finalize_query(s);
        assert_eq!(s.query, QueryPhase::Idle);
        assert!(!is_query_running(s));
    }

    #[test]
    fn stop_during_running_enters_aborting() {
        let s = start_query(start_processing(RuntimeState::default()));
        let s = request_stop_during_running(s);
        assert!(s.stop_requested);
        assert_eq!(s.query, QueryPhase::Aborting);
        assert!(is_query_running(s));
        // Aborting is not a processing phase.
        assert!(!is_query_processing(s));
    }

    #[test]
    fn stop_during_preparing_keeps_phase() {
        let s = start_processing(RuntimeState::default());
        let s = request_stop_during_preparing(s);
        assert!(s.stop_requested);
        assert_eq!(s.query, QueryPhase::Preparing);
    }

    #[test]
    fn start_query_clears_stop_flag() {
        let s = request_stop_during_preparing(start_processing(RuntimeState::default()));
        let s = start_query(s);
        assert!(!s.stop_requested);
    }

    #[test]
    fn interrupt_flag_consumes_once() {
        let s = mark_interrupt_flag(RuntimeState::default());
        let s = request_stop_during_preparing(s);

        let (was_interrupted, s) = consume_interrupt_flag(s);
        assert!(was_interrupted);
        assert!(!s.interrupt_pending);
        assert!(!s.stop_requested);

        let (was_interrupted, _) = consume_interrupt_flag(s);
        assert!(!was_interrupted);
    }

    #[test]
    fn begin_interrupt_is_idempotent() {
        let (started, s) = begin_interrupt(RuntimeState::default());
        assert!(started);
        assert!(s.is_interrupting);

        let (started_again, s2) = begin_interrupt(s);
        assert!(!started_again);
        assert_eq!(s2, s);

        let s = end_interrupt(s2);
        assert!(!s.is_interrupting);
    }

    #[test]
    fn kill_reset_preserves_generation() {
        let s = start_query(start_processing(RuntimeState::default()));
        let s = increment_generation(s);
        let s = reset_after_kill(s);
        assert_eq!(s.generation, 1);
        assert_eq!(s.query, QueryPhase::Idle);
        assert!(!s.stop_requested);
    }

    fn arb_state() -> impl Strategy<Value = RuntimeState> {
        (
            0u8..3,
            0u8..5,
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            0u64..1000,
        )
            .prop_map(|(a, q, stop, ip, ii, generation)| RuntimeState {
                activity: [Activity::Idle, Activity::Working, Activity::Waiting][a as usize],
                query: [
                    QueryPhase::Idle,
                    QueryPhase::Preparing,
                    QueryPhase::Running,
                    QueryPhase::Aborting,
                    QueryPhase::Completing,
                ][q as usize],
                stop_requested: stop,
                interrupt_pending: ip,
                is_interrupting: ii,
                generation,
            })
    }

    proptest! {
        #[test]
        fn transitions_never_decrease_generation(s in arb_state()) {
            let transitions: [fn(RuntimeState) -> RuntimeState; 11] = [
                start_processing,
                start_query,
                complete_query,
                finalize_query,
                stop_processing,
                request_stop_during_running,
                request_stop_during_preparing,
                clear_stop_requested,
                mark_interrupt_flag,
                end_interrupt,
                increment_generation,
            ];
            for transition in transitions {
                prop_assert!(transition(s).generation >= s.generation);
            }
            prop_assert!(consume_interrupt_flag(s).1.generation >= s.generation);
            prop_assert!(begin_interrupt(s).1.generation >= s.generation);
            prop_assert!(reset_after_kill(s).generation >= s.generation);
        }

        #[test]
        fn transitions_are_pure(s in arb_state()) {
            // Same input record, same output record.
            prop_assert_eq!(start_query(s), start_query(s));
            prop_assert_eq!(consume_interrupt_flag(s), consume_interrupt_flag(s));
            prop_assert_eq!(begin_interrupt(s), begin_interrupt(s));
        }

        #[test]
        fn increment_generation_is_strict(s in arb_state()) {
            prop_assert_eq!(increment_generation(s).generation, s.generation + 1);
        }
    }
}
