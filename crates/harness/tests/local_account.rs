use iddir_engine::{Breadcrumb, EngineConfig, EngineError, LocalIdentity, ReconcileOptions};
use iddir_harness::{aci, pni, ObservedEvent, TestDirectory};
use iddir_storage::RecordReader;

const SELF_E164: &str = "+15550000001";
const NEW_E164: &str = "+15550000002";

fn own_directory() -> Result<TestDirectory, EngineError> {
    TestDirectory::with_config(EngineConfig {
        local_identity: Some(LocalIdentity {
            e164: Some(SELF_E164.into()),
            pni: Some(pni(1)),
            aci: Some(aci(1)),
        }),
        ..EngineConfig::default()
    })
}

const CHANGE_SELF: ReconcileOptions = ReconcileOptions {
    pni_verified: false,
    change_self: true,
};

// ============================================================================
// Local account protection
// ============================================================================

#[test]
fn own_number_stays_on_self_record() -> Result<(), Box<dyn std::error::Error>> {
    let mut dir = own_directory()?;
    let me = dir.insert_raw(Some(SELF_E164), Some(pni(1)), Some(aci(1)))?;
    let other = dir.insert_raw(None, Some(pni(2)), None)?;

    let result = dir.reconcile(Some(SELF_E164), Some(pni(2)), None)?;
    assert!(result.is_noop());
    assert_eq!(result.record_id, other);
    assert!(result.breadcrumbs.contains(&Breadcrumb::SelfProtected));
    assert_eq!(dir.record(me)?.e164.as_deref(), Some(SELF_E164));
    assert_eq!(dir.record(other)?.e164, None);
    assert!(dir.events().is_empty());
    Ok(())
}

#[test]
fn change_self_lets_own_number_move() -> Result<(), Box<dyn std::error::Error>> {
    let mut dir = own_directory()?;
    let me = dir.insert_raw(Some(SELF_E164), Some(pni(1)), Some(aci(1)))?;
    let other = dir.insert_raw(None, Some(pni(2)), None)?;

    let result = dir.reconcile_with(Some(SELF_E164), Some(pni(2)), None, CHANGE_SELF)?;
    assert_eq!(result.record_id, other);
    assert!(!result.breadcrumbs.contains(&Breadcrumb::SelfProtected));
    assert_eq!(dir.record(me)?.e164, None);
    assert_eq!(dir.record(other)?.e164.as_deref(), Some(SELF_E164));
    dir.check_invariants()?;
    Ok(())
}

#[test]
fn self_record_is_not_merged_away() -> Result<(), Box<dyn std::error::Error>> {
    let mut dir = own_directory()?;
    let me = dir.insert_raw(Some(SELF_E164), None, None)?;
    let account = dir.insert_raw(None, None, Some(aci(7)))?;

    let result = dir.reconcile(Some(SELF_E164), None, Some(aci(7)))?;
    assert!(result.is_noop());
    assert_eq!(result.record_id, account);
    assert!(result.retired_ids.is_empty());
    assert_eq!(dir.engine.record_count()?, 2);
    assert_eq!(dir.engine.storage().get_remap(me)?, None);
    assert_eq!(dir.record(me)?.e164.as_deref(), Some(SELF_E164));
    Ok(())
}

#[test]
fn conflicting_aci_for_own_number_gets_a_bare_record() -> Result<(), Box<dyn std::error::Error>> {
    let mut dir = own_directory()?;
    let me = dir.insert_raw(Some(SELF_E164), Some(pni(1)), Some(aci(1)))?;

    let result = dir.reconcile(Some(SELF_E164), Some(pni(1)), Some(aci(9)))?;
    assert!(result.required_insert);
    assert_eq!(result.affected_ids, vec![result.record_id]);

    let fresh = dir.record(result.record_id)?;
    assert_eq!(fresh.e164, None);
    assert_eq!(fresh.pni, None);
    assert_eq!(fresh.aci(), Some(aci(9)));

    let mine = dir.record(me)?;
    assert_eq!(mine.e164.as_deref(), Some(SELF_E164));
    assert_eq!(mine.pni, Some(pni(1)));
    dir.check_invariants()?;

    let again = dir.reconcile(Some(SELF_E164), Some(pni(1)), Some(aci(9)))?;
    assert!(again.is_noop());
    assert_eq!(again.record_id, result.record_id);
    Ok(())
}

#[test]
fn own_number_change_needs_change_self() -> Result<(), Box<dyn std::error::Error>> {
    let mut dir = own_directory()?;
    let me = dir.insert_raw(Some(SELF_E164), Some(pni(1)), Some(aci(1)))?;

    let ignored = dir.reconcile(Some(NEW_E164), Some(pni(1)), Some(aci(1)))?;
    assert!(ignored.is_noop());
    assert_eq!(dir.record(me)?.e164.as_deref(), Some(SELF_E164));

    let changed = dir.reconcile_with(Some(NEW_E164), Some(pni(1)), Some(aci(1)), CHANGE_SELF)?;
    assert_eq!(changed.record_id, me);
    assert_eq!(changed.changed_number_id, Some(me));
    assert_eq!(dir.record(me)?.e164.as_deref(), Some(NEW_E164));
    assert_eq!(
        dir.events(),
        vec![ObservedEvent::NumberChanged {
            record_id: me,
            old_e164: SELF_E164.into(),
            new_e164: NEW_E164.into(),
        }]
    );
    Ok(())
}

#[test]
fn strangers_reconcile_normally_beside_local_account() -> Result<(), Box<dyn std::error::Error>> {
    let mut dir = own_directory()?;
    dir.insert_raw(Some(SELF_E164), Some(pni(1)), Some(aci(1)))?;
    let r1 = dir.insert_raw(Some(NEW_E164), None, None)?;
    let r2 = dir.insert_raw(None, None, Some(aci(5)))?;

    let result = dir.reconcile(Some(NEW_E164), None, Some(aci(5)))?;
    assert_eq!(result.record_id, r2);
    assert_eq!(result.retired_ids, vec![r1]);
    Ok(())
}

// ============================================================================
// Verified PNI links
// ============================================================================

#[test]
fn verified_pni_link_skips_switchover() -> Result<(), Box<dyn std::error::Error>> {
    let mut dir = TestDirectory::new()?;
    let id = dir.insert_raw(None, Some(pni(4)), None)?;

    let verified = ReconcileOptions {
        pni_verified: true,
        change_self: false,
    };
    let result = dir.reconcile_with(None, Some(pni(4)), Some(aci(4)), verified)?;
    assert_eq!(result.record_id, id);
    assert!(result.markers.is_empty());
    assert!(result.breadcrumbs.contains(&Breadcrumb::VerifiedSwitchover));
    assert_eq!(dir.record(id)?.aci(), Some(aci(4)));
    assert!(dir.events().is_empty());
    Ok(())
}

#[test]
fn unverified_pni_link_switches_session() -> Result<(), Box<dyn std::error::Error>> {
    let mut dir = TestDirectory::new()?;
    let id = dir.insert_raw(None, Some(pni(4)), None)?;

    dir.reconcile_with(None, Some(pni(4)), Some(aci(4)), ReconcileOptions::default())?;
    assert_eq!(dir.events(), vec![ObservedEvent::SessionSwitchover(id)]);
    Ok(())
}
