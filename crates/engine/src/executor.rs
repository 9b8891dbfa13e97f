use iddir_core::IdentityOp;
use iddir_storage::{RecordWriter, StorageError};

use crate::planner::{Plan, Target};

/// Write a simulated plan through `writer`, in plan order. Every merge
/// records where the retired id now resolves before returning.
pub fn execute<W: RecordWriter + ?Sized>(writer: &mut W, plan: &Plan) -> Result<(), StorageError> {
    for op in &plan.operations {
        match op {
            IdentityOp::SetE164 { record_id, e164 } => writer.set_e164(*record_id, e164)?,
            IdentityOp::SetPni { record_id, pni } => writer.set_pni(*record_id, *pni)?,
            IdentityOp::SetAci { record_id, aci } => writer.set_aci(*record_id, *aci)?,
            IdentityOp::RemoveE164 { record_id } => writer.remove_e164(*record_id)?,
            IdentityOp::RemovePni { record_id } => writer.remove_pni(*record_id)?,
            IdentityOp::Merge {
                primary_id,
                secondary_id,
            } => {
                writer.merge_records(*primary_id, *secondary_id)?;
                writer.put_remap(*secondary_id, *primary_id)?;
                tracing::info!(primary = %primary_id, retired = %secondary_id, "merged records");
            }
            IdentityOp::ChangeNumberInsert { .. } | IdentityOp::SessionSwitchoverInsert { .. } => {}
        }
    }

    if let Target::Insert(record) = &plan.target {
        writer.insert_record(record)?;
        tracing::info!(record = %record.id, "inserted record");
    }
    Ok(())
}
