//! Assertions for hub state and errors

use crate::core_hub::directory::DirectoryState;
use crate::core_hub::error::HubError;
use crate::core_hub::types::HubId;
use std::fmt::Debug;

/// Assert that a Result is Ok and return the value
pub fn assert_ok<T, E: Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// Assert that a Result is Err and return the error
pub fn assert_err<T: Debug, E>(result: Result<T, E>) -> E {
    match result {
        Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
        Err(e) => e,
    }
}

/// Assert that a hub action failed and the same message was recorded
pub fn assert_recorded(state: &DirectoryState, error: &HubError) {
    assert_eq!(
        state.error.as_deref(),
        Some(error.to_string().as_str()),
        "directory error does not match the returned error"
    );
    assert!(!state.is_loading, "loading flag left set after failure");
}

pub fn assert_current_hub(state: &DirectoryState, hub_id: &HubId) {
    assert_eq!(
        state.current_hub_id(),
        Some(hub_id),
        "unexpected current hub, hubs: {:?}",
        state.user_hubs.iter().map(|h| &h.name).collect::<Vec<_>>()
    );
}

/// Assert the cached user hubs are exactly `names`, in any order
pub fn assert_hub_names(state: &DirectoryState, names: &[&str]) {
    let mut actual: Vec<&str> = state.user_hubs.iter().map(|h| h.name.as_str()).collect();
    let mut expected = names.to_vec();
    actual.sort_unstable();
    expected.sort_unstable();
    assert_eq!(actual, expected);
}
