use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use color_eyre::{
    eyre::{bail, eyre},
    Result,
};
use keyhold_core::{
    envelope::Envelope,
    storage::{BlobStore, HardwareKeyStore},
};
use keyhold_vault::{CreateOptions, PairState, Vault, VaultError};

use crate::cli::KeyCommand;

/// Run a vault call on the blocking pool. Vault operations are synchronous
/// and touch the credential store and disk.
pub async fn blocking<K, B, T, F>(vault: &Arc<Vault<K, B>>, op: F) -> Result<T>
where
    K: HardwareKeyStore + 'static,
    B: BlobStore + 'static,
    T: Send + 'static,
    F: FnOnce(&Vault<K, B>) -> Result<T, VaultError> + Send + 'static,
{
    let vault = Arc::clone(vault);
    tokio::task::spawn_blocking(move || op(&vault))
        .await
        .map_err(|e| eyre!("vault worker failed: {e}"))?
        .map_err(|e| eyre!(e.to_string()))
}

/// Execute a key subcommand. `input` is stdin for `encrypt`/`decrypt`.
/// Returns the bytes to write to stdout.
pub async fn execute<K, B>(
    vault: &Arc<Vault<K, B>>,
    cmd: KeyCommand,
    exclude_from_backup: bool,
    input: Vec<u8>,
) -> Result<Vec<u8>>
where
    K: HardwareKeyStore + 'static,
    B: BlobStore + 'static,
{
    let out = match cmd {
        KeyCommand::Create {
            name,
            force,
            include_in_backup,
        } => {
            let options = CreateOptions {
                force_overwrite: force,
                exclude_from_backup: exclude_from_backup && !include_in_backup,
            };
            let label = name.clone();
            blocking(vault, move |v| v.create(&name, options)).await?;
            format!("Created key pair {label}\n").into_bytes()
        }
        KeyCommand::Exists { name } => {
            let present = blocking(vault, move |v| v.exists(&name)).await?;
            let word = if present { "present" } else { "absent" };
            format!("{word}\n").into_bytes()
        }
        KeyCommand::Status { name } => {
            let label = name.clone();
            let state = blocking(vault, move |v| v.pair_state(&name)).await?;
            format!("{label}: {}\n", state_label(state)).into_bytes()
        }
        KeyCommand::Delete { name, force } => {
            let label = name.clone();
            blocking(vault, move |v| v.delete(&name, force)).await?;
            format!("Deleted key pair {label}\n").into_bytes()
        }
        KeyCommand::Encrypt { name, aad } => {
            let envelope =
                blocking(vault, move |v| v.encrypt(&name, &input, aad.as_bytes())).await?;
            let bytes = envelope.to_bytes().map_err(|e| eyre!(e.to_string()))?;
            let mut encoded = STANDARD.encode(bytes).into_bytes();
            encoded.push(b'\n');
            encoded
        }
        KeyCommand::Decrypt { name } => {
            let text =
                String::from_utf8(input).map_err(|_| eyre!("envelope must be base64 text"))?;
            let bytes = STANDARD
                .decode(text.trim())
                .map_err(|e| eyre!("envelope is not valid base64: {e}"))?;
            let envelope = Envelope::from_bytes(&bytes).map_err(|e| eyre!(e.to_string()))?;
            let plaintext = blocking(vault, move |v| v.decrypt(&name, &envelope)).await?;
            plaintext.to_vec()
        }
    };
    Ok(out)
}

fn state_label(state: PairState) -> String {
    match state {
        PairState::Absent => "absent".to_string(),
        PairState::Consistent => "consistent".to_string(),
        PairState::Inconsistent {
            kek_present,
            dek_present,
        } => format!(
            "inconsistent (kek: {}, dek: {})",
            yes_no(kek_present),
            yes_no(dek_present)
        ),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Name of the throwaway pair used by `health`.
pub const HEALTH_CHECK_KEY: &str = "keyhold-health-check";

/// Create, seal, open, and delete a throwaway pair. Refuses to run when a
/// pair with the same name already exists, so it never removes one it did
/// not create.
pub async fn run_health<K, B>(vault: &Arc<Vault<K, B>>) -> Result<()>
where
    K: HardwareKeyStore + 'static,
    B: BlobStore + 'static,
{
    let payload = b"ok";

    let created = blocking(vault, |v| {
        match v.create(HEALTH_CHECK_KEY, CreateOptions::default()) {
            Ok(()) => Ok(true),
            Err(VaultError::AlreadyExists { .. } | VaultError::Inconsistent { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    })
    .await?;
    if !created {
        bail!("key pair {HEALTH_CHECK_KEY} already exists; leaving it untouched");
    }

    let round_trip = blocking(vault, move |v| {
        let envelope = v.encrypt(HEALTH_CHECK_KEY, payload, b"health")?;
        v.decrypt(HEALTH_CHECK_KEY, &envelope)
    })
    .await;
    blocking(vault, |v| v.delete(HEALTH_CHECK_KEY, true)).await?;

    if round_trip?.as_slice() != payload {
        bail!("envelope round-trip failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use keyhold_core::{storage::InMemoryBlobStore, tags::kek_tag};
    use keyhold_storage::key_store::InMemoryKeyStore;

    use super::*;

    type TestVault = Vault<InMemoryKeyStore, InMemoryBlobStore>;

    fn test_vault() -> (Arc<TestVault>, InMemoryKeyStore, InMemoryBlobStore) {
        let keys = InMemoryKeyStore::new();
        let blobs = InMemoryBlobStore::new();
        (
            Arc::new(Vault::new(keys.clone(), blobs.clone())),
            keys,
            blobs,
        )
    }

    async fn run(vault: &Arc<TestVault>, cmd: KeyCommand, input: &[u8]) -> Result<String> {
        let out = execute(vault, cmd, true, input.to_vec()).await?;
        Ok(String::from_utf8(out).expect("utf8 output"))
    }

    fn create(name: &str) -> KeyCommand {
        KeyCommand::Create {
            name: name.into(),
            force: false,
            include_in_backup: false,
        }
    }

    #[tokio::test]
    async fn create_exists_delete_flow() {
        let (vault, _, _) = test_vault();
        let exists = || KeyCommand::Exists {
            name: "alpha".into(),
        };

        assert_eq!(run(&vault, exists(), b"").await.expect("exists"), "absent\n");
        assert_eq!(
            run(&vault, create("alpha"), b"").await.expect("create"),
            "Created key pair alpha\n"
        );
        assert_eq!(run(&vault, exists(), b"").await.expect("exists"), "present\n");

        let delete = KeyCommand::Delete {
            name: "alpha".into(),
            force: false,
        };
        run(&vault, delete.clone(), b"").await.expect("delete");
        let err = run(&vault, delete, b"").await.expect_err("second delete");
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn encrypt_output_decrypts() {
        let (vault, _, _) = test_vault();
        run(&vault, create("notes"), b"").await.expect("create");

        let sealed = run(
            &vault,
            KeyCommand::Encrypt {
                name: "notes".into(),
                aad: "v1".into(),
            },
            b"hello keyhold",
        )
        .await
        .expect("encrypt");
        assert!(!sealed.contains("hello"));

        let opened = run(
            &vault,
            KeyCommand::Decrypt {
                name: "notes".into(),
            },
            sealed.as_bytes(),
        )
        .await
        .expect("decrypt");
        assert_eq!(opened, "hello keyhold");
    }

    #[tokio::test]
    async fn decrypt_rejects_garbage() {
        let (vault, _, _) = test_vault();
        run(&vault, create("notes"), b"").await.expect("create");
        let err = run(
            &vault,
            KeyCommand::Decrypt {
                name: "notes".into(),
            },
            b"%%%",
        )
        .await
        .expect_err("not base64");
        assert!(err.to_string().contains("base64"));
    }

    #[tokio::test]
    async fn status_shows_half_present_pair() {
        let (vault, keys, _) = test_vault();
        keys.generate(&kek_tag("beta"), &Default::default())
            .expect("inject kek");

        let status = run(
            &vault,
            KeyCommand::Status {
                name: "beta".into(),
            },
            b"",
        )
        .await
        .expect("status");
        assert_eq!(status, "beta: inconsistent (kek: yes, dek: no)\n");

        let err = run(
            &vault,
            KeyCommand::Exists {
                name: "beta".into(),
            },
            b"",
        )
        .await
        .expect_err("exists must fail");
        assert!(err.to_string().contains("inconsistent"));
    }

    #[tokio::test]
    async fn include_in_backup_clears_exclusion() {
        let (vault, _, blobs) = test_vault();
        run(
            &vault,
            KeyCommand::Create {
                name: "gamma".into(),
                force: false,
                include_in_backup: true,
            },
            b"",
        )
        .await
        .expect("create");
        let options = blobs
            .options_for(&keyhold_core::tags::dek_tag("gamma"))
            .expect("written");
        assert!(!options.exclude_from_backup);
    }

    #[tokio::test]
    async fn health_check_leaves_nothing_behind() {
        let (vault, _, _) = test_vault();
        run_health(&vault).await.expect("health");
        assert!(!vault.exists(HEALTH_CHECK_KEY).expect("exists"));
    }

    #[tokio::test]
    async fn health_check_keeps_existing_pair_with_its_name() {
        let (vault, _, _) = test_vault();
        run(&vault, create(HEALTH_CHECK_KEY), b"").await.expect("create");
        let sealed = vault
            .encrypt(HEALTH_CHECK_KEY, b"user data", b"")
            .expect("encrypt");

        let err = run_health(&vault).await.expect_err("must refuse");
        assert!(err.to_string().contains("already exists"));

        let opened = vault
            .decrypt(HEALTH_CHECK_KEY, &sealed)
            .expect("original pair intact");
        assert_eq!(opened.as_slice(), b"user data");
    }

    #[tokio::test]
    async fn health_check_keeps_half_present_pair() {
        let (vault, keys, _) = test_vault();
        keys.generate(&kek_tag(HEALTH_CHECK_KEY), &Default::default())
            .expect("inject kek");

        run_health(&vault).await.expect_err("must refuse");
        assert!(keys.contains(&kek_tag(HEALTH_CHECK_KEY)).expect("contains"));
    }
}
