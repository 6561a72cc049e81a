mod common;

use common::strategies::*;
use jacs_services::args::ServiceArgs;
use jacs_services::models::ServiceSubmission;
use jacs_services::persistence::JacsServiceDataPersistence;
use jacs_services::services::FileCopyArgs;
use jacs_services::state_machine::{determine_target_state, ServiceStateMachine};
use jacs_services::{ArgumentError, InMemoryServiceDataPersistence, JacsServiceData, JacsServiceState};
use proptest::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;

proptest! {
    /// Property: accepted transitions never move a service backwards, and terminal states accept nothing
    #[test]
    fn transitions_are_monotonic(events in event_sequence_strategy()) {
        let mut state = JacsServiceState::Created;
        for event in &events {
            match determine_target_state(state, event) {
                Ok(next) => {
                    prop_assert!(!state.is_terminal(), "{state} accepted {event:?}");
                    prop_assert!(next.rank() >= state.rank());
                    state = next;
                }
                Err(_) => prop_assert!(
                    state.is_terminal() || !matches!(event, jacs_services::ServiceEvent::Cancel(_))
                ),
            }
        }
    }

    /// Property: the persisted record agrees with the pure transition table
    #[test]
    fn persisted_transitions_follow_the_table(events in event_sequence_strategy()) {
        tokio_test::block_on(async {
            let store = Arc::new(InMemoryServiceDataPersistence::new());
            let record = JacsServiceData::from_submission(ServiceSubmission::new("fileCopy"));
            store.create(&record).await.unwrap();
            let machine = ServiceStateMachine::new(store.clone());

            let mut expected = JacsServiceState::Created;
            let mut accepted = 1;
            for event in events {
                let target = determine_target_state(expected, &event);
                let applied = machine.transition(record.id, event).await;
                prop_assert_eq!(target.is_ok(), applied.is_ok());
                if let Ok(next) = target {
                    expected = next;
                    accepted += 1;
                }
            }

            let stored = store.find_by_id(record.id).await.unwrap().unwrap();
            prop_assert_eq!(stored.state, expected);
            prop_assert_eq!(stored.events.len(), accepted);
            prop_assert_eq!(stored.stringified_result.is_some(), expected == JacsServiceState::Success);
            Ok(())
        })?;
    }

    /// Property: copy arguments parse regardless of their order
    #[test]
    fn file_copy_args_parse_in_any_order(
        src in absolute_path_strategy(),
        dst in absolute_path_strategy(),
        mv in any::<bool>(),
        swap in any::<bool>(),
    ) {
        let mut pairs = vec![
            vec!["-src".to_string(), src.clone()],
            vec!["-dst".to_string(), dst.clone()],
        ];
        if mv {
            pairs.push(vec!["-mv".to_string()]);
        }
        if swap {
            pairs.reverse();
        }
        let args: Vec<String> = pairs.into_iter().flatten().collect();

        let parsed = FileCopyArgs::parse(&args).unwrap();
        prop_assert_eq!(parsed.source, PathBuf::from(src));
        prop_assert_eq!(parsed.target, PathBuf::from(dst));
        prop_assert_eq!(parsed.delete_source, mv);
    }

    /// Property: undeclared flags are always rejected
    #[test]
    fn unknown_flags_are_rejected(flag in unknown_flag_strategy(), src in absolute_path_strategy()) {
        let args = vec!["-src".to_string(), src.clone(), "-dst".to_string(), src, flag.clone()];
        prop_assert_eq!(FileCopyArgs::parse(&args).unwrap_err(), ArgumentError::UnknownFlag(flag));
    }
}
