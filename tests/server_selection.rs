//! `ReadPreference`/`SelectionCriteria` public behavior: eligibility and tag-set/staleness
//! plumbing, exercised through the crate's public surface rather than the private selection
//! algorithm itself (see `src/sdam/server_selection.rs` for the algorithm's own unit tests).

use std::time::Duration;

use docking::options::ClientOptions;
use docking::read_preference::{ReadPreference, SelectionCriteria};

#[test]
fn only_primary_and_primary_preferred_allow_the_primary() {
    assert!(ReadPreference::Primary.allows_primary());
    assert!(ReadPreference::PrimaryPreferred {
        tag_sets: None,
        max_staleness: None,
    }
    .allows_primary());
    assert!(!ReadPreference::Secondary {
        tag_sets: None,
        max_staleness: None,
    }
    .allows_primary());
    assert!(!ReadPreference::Nearest {
        tag_sets: None,
        max_staleness: None,
    }
    .allows_primary());
}

#[test]
fn primary_never_carries_tag_sets_or_staleness() {
    assert_eq!(ReadPreference::Primary.tag_sets(), None);
    assert_eq!(ReadPreference::Primary.max_staleness(), None);
}

#[test]
fn selection_criteria_converts_from_read_preference() {
    let pref = ReadPreference::Secondary {
        tag_sets: None,
        max_staleness: None,
    };
    let criteria: SelectionCriteria = pref.clone().into();
    assert_eq!(criteria, SelectionCriteria::ReadPreference(pref));
}

#[test]
fn uri_read_preference_mode_and_tags_round_trip() {
    let options = ClientOptions::parse(
        "mongodb://host1,host2/?replicaSet=rs0\
         &readPreference=secondaryPreferred\
         &readPreferenceTags=dc:east,rack:1\
         &readPreferenceTags=",
        None,
    )
    .unwrap();

    let pref = options
        .read_preference
        .expect("readPreference should have been parsed");
    assert!(!pref.allows_primary());
    let tag_sets = pref.tag_sets().expect("tag sets should be present");
    assert_eq!(tag_sets.len(), 2);
    assert_eq!(tag_sets[0].get("dc").map(String::as_str), Some("east"));
    assert_eq!(tag_sets[0].get("rack").map(String::as_str), Some("1"));
    assert!(tag_sets[1].is_empty());
}

#[test]
fn uri_max_staleness_is_parsed_into_a_duration() {
    let options = ClientOptions::parse(
        "mongodb://host1,host2/?replicaSet=rs0&readPreference=secondary&maxStalenessSeconds=120",
        None,
    )
    .unwrap();

    let pref = options.read_preference.unwrap();
    assert_eq!(pref.max_staleness(), Some(Duration::from_secs(120)));
}
