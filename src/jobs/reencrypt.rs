//! One-shot job: rewrite stored secrets in the current format.
//!
//! Without a previous codec only legacy (zero-nonce) records are touched.
//! With one, every record is decrypted under the old key and re-encrypted
//! under the pool's codec, which is how the passphrase is rotated.

use serde::Serialize;
use uuid::Uuid;

use crate::errors::PoolError;
use crate::models::CredentialPatch;
use crate::pool::CredentialPool;
use crate::vault::SecretCodec;

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReencryptReport {
    pub migrated: usize,
    pub skipped: usize,
    pub failed: Vec<Uuid>,
}

pub async fn run(
    pool: &CredentialPool,
    service_name: &str,
    previous: Option<&SecretCodec>,
) -> Result<ReencryptReport, PoolError> {
    let codec = pool.codec();
    let source = previous.unwrap_or(codec.as_ref());
    let mut report = ReencryptReport::default();

    for record in pool.list(service_name).await? {
        if previous.is_none() && !SecretCodec::is_legacy(&record.encrypted_key) {
            report.skipped += 1;
            continue;
        }

        let rewritten = match codec.reencrypt_from(source, &record.encrypted_key) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(
                    service = service_name,
                    credential_id = %record.id,
                    "failed to re-encrypt credential: {}",
                    e
                );
                report.failed.push(record.id);
                continue;
            }
        };

        let found = pool
            .store()
            .update_fields(record.id, CredentialPatch::rekey(rewritten))
            .await
            .map_err(PoolError::Database)?;
        if found {
            report.migrated += 1;
        } else {
            report.failed.push(record.id);
        }
    }

    tracing::info!(
        service = service_name,
        migrated = report.migrated,
        skipped = report.skipped,
        failed = report.failed.len(),
        "re-encryption finished"
    );
    Ok(report)
}
