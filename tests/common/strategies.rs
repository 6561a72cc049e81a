use jacs_services::ServiceEvent;
use proptest::prelude::*;

/// Strategy for generating any lifecycle event
pub fn service_event_strategy() -> impl Strategy<Value = ServiceEvent> {
    prop_oneof![
        Just(ServiceEvent::Enqueue),
        Just(ServiceEvent::Start),
        "[a-z0-9/\"]{0,12}".prop_map(ServiceEvent::Complete),
        "[a-z ]{0,12}".prop_map(ServiceEvent::Fail),
        "[a-z ]{0,12}".prop_map(ServiceEvent::Cancel),
    ]
}

pub fn event_sequence_strategy() -> impl Strategy<Value = Vec<ServiceEvent>> {
    prop::collection::vec(service_event_strategy(), 0..16)
}

/// Strategy for generating absolute paths
pub fn absolute_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-zA-Z0-9_.]{1,12}", 1..5).prop_map(|parts| format!("/{}", parts.join("/")))
}

/// Strategy for generating flags no built-in service declares
pub fn unknown_flag_strategy() -> impl Strategy<Value = String> {
    "-zz[a-zA-Z]{1,10}"
}
