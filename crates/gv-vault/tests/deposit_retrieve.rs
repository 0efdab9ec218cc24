//! End-to-end deposit / search / fetch / purge against an in-memory operator.

use std::io::Read;
use std::sync::Arc;

use gv_core::config::{RetrievalConfig, RetrievalStrategy};
use gv_core::{DepositStage, RecordStatus, RetrievalQuery, VaultError, TABLE_VAULT};
use gv_crypto::KdfParams;
use gv_storage::{memory_operator, OpendalBlobStore, OpendalRowStore};
use gv_vault::{
    deposit, fetch_into, fetch_payload, find_record, purge, search, DepositRequest, VaultContext,
};
use secrecy::SecretString;

const CHUNK: usize = 256;

fn context() -> VaultContext {
    let op = memory_operator().expect("memory operator");
    VaultContext::new(
        Arc::new(OpendalBlobStore::new(op.clone())),
        Arc::new(OpendalRowStore::new(op)),
    )
    .with_kdf_params(KdfParams { iterations: 1_000 })
    .with_chunk_size(CHUNK)
}

fn pass(s: &str) -> SecretString {
    SecretString::from(s)
}

fn request(filename: &str, state: &str, city: &str, date: &str, payload: &[u8]) -> DepositRequest {
    DepositRequest::from_bytes(filename, date, state, city, payload.to_vec())
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn query(state: Option<&str>, city: Option<&str>, date: Option<&str>) -> RetrievalQuery {
    RetrievalQuery {
        state: state.map(Into::into),
        city: city.map(Into::into),
        date: date.map(Into::into),
    }
}

#[tokio::test]
async fn fresno_deposit_is_found_and_fetched() {
    let ctx = context();
    let data = payload(CHUNK * 3 + 17);
    let receipt = deposit(
        &ctx,
        request("clip.mp4", "California", "Fresno", "2024-03-01", &data),
        &pass("correct horse"),
        None,
        None,
    )
    .await
    .unwrap();

    assert_eq!(receipt.record.status, RecordStatus::Completed);
    assert_eq!(receipt.record.size, data.len() as u64);
    assert!(receipt.backup_key.as_str().starts_with("GV-"));
    assert!(receipt.record.wrapped_key.starts_with("PWV3:"));

    let hits = search(
        &ctx,
        &query(Some("  california"), Some("FRESNO"), None),
        &pass("correct horse"),
        None,
        None,
    )
    .await
    .unwrap();
    assert_eq!(hits.len(), 1);
    let meta = hits[0].metadata.as_ref().unwrap();
    assert_eq!(meta.filename, "clip.mp4");
    assert_eq!(meta.mime_type, "video/mp4");
    assert_eq!(meta.city, "Fresno");

    let fetched = fetch_payload(&ctx, &hits[0], &pass("correct horse"), None, None)
        .await
        .unwrap();
    assert_eq!(fetched, data);
}

#[tokio::test]
async fn stored_row_reveals_nothing_in_plaintext() {
    let ctx = context();
    let receipt = deposit(
        &ctx,
        request("clip.mp4", "California", "Fresno", "2024-03-01", b"secret bytes"),
        &pass("correct horse"),
        None,
        None,
    )
    .await
    .unwrap();

    let rows = ctx
        .rows()
        .query(TABLE_VAULT, &Default::default())
        .await
        .unwrap();
    let json = format!("{:?}", rows[0]).to_lowercase();
    assert!(!json.contains("fresno"));
    assert!(!json.contains("clip.mp4"));
    assert!(!receipt.record.blob_path.contains("fresno"));

    let blob = ctx.blobs().get(&receipt.record.blob_path).await.unwrap();
    assert!(!blob.windows(12).any(|w| w == b"secret bytes"));
}

#[tokio::test]
async fn two_deposits_same_city_share_digest_and_both_match() {
    let ctx = context();
    let first = deposit(
        &ctx,
        request("a.jpg", "California", "Fresno", "2024-03-01", b"first"),
        &pass("correct horse"),
        None,
        None,
    )
    .await
    .unwrap();
    let second = deposit(
        &ctx,
        request("b.jpg", "california", " fresno ", "2024-03-02", b"second"),
        &pass("correct horse"),
        None,
        None,
    )
    .await
    .unwrap();
    deposit(
        &ctx,
        request("c.jpg", "California", "Fresno", "2024-03-01", b"other user"),
        &pass("battery staple"),
        None,
        None,
    )
    .await
    .unwrap();

    let a = first.record.blind_indexes.as_ref().unwrap();
    let b = second.record.blind_indexes.as_ref().unwrap();
    assert_eq!(a.city, b.city);
    assert_eq!(a.state, b.state);
    assert_ne!(a.date, b.date);

    let hits = search(
        &ctx,
        &query(None, Some("Fresno"), None),
        &pass("correct horse"),
        None,
        None,
    )
    .await
    .unwrap();
    let mut names: Vec<_> = hits
        .iter()
        .map(|r| r.metadata.as_ref().unwrap().filename.as_str())
        .collect();
    names.sort();
    assert_eq!(names, ["a.jpg", "b.jpg"]);

    let by_date = search(
        &ctx,
        &query(None, Some("Fresno"), Some("2024-03-02")),
        &pass("correct horse"),
        None,
        None,
    )
    .await
    .unwrap();
    assert_eq!(by_date.len(), 1);
    assert_eq!(by_date[0].id, second.record.id);
}

#[tokio::test]
async fn decrypt_all_strategy_agrees_with_blind_index() {
    let ctx = context();
    for (name, city) in [("a.mov", "Fresno"), ("b.mov", "Modesto"), ("c.mov", "Fresno")] {
        deposit(
            &ctx,
            request(name, "California", city, "2024-01-01", b"x"),
            &pass("pw"),
            None,
            None,
        )
        .await
        .unwrap();
    }
    let q = query(None, Some("fresno"), None);

    let indexed = search(&ctx, &q, &pass("pw"), None, None).await.unwrap();
    let scanning = ctx.clone().with_retrieval(RetrievalConfig {
        strategy: RetrievalStrategy::DecryptAll,
        concurrency: 2,
        include_legacy: true,
    });
    let decrypted = search(&scanning, &q, &pass("pw"), None, None)
        .await
        .unwrap();

    let ids = |v: &[gv_core::Record]| v.iter().map(|r| r.id.clone()).collect::<Vec<_>>();
    assert_eq!(indexed.len(), 2);
    assert_eq!(ids(&indexed[..]), ids(&decrypted[..]));
}

#[tokio::test]
async fn empty_query_lists_everything_the_passphrase_opens() {
    let ctx = context();
    for pw in ["mine", "mine", "theirs"] {
        deposit(
            &ctx,
            request("f.png", "Ohio", "Akron", "2024-01-01", b"img"),
            &pass(pw),
            None,
            None,
        )
        .await
        .unwrap();
    }
    let hits = search(&ctx, &RetrievalQuery::default(), &pass("mine"), None, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.windows(2).all(|w| (w[0].created_at, &w[0].id) <= (w[1].created_at, &w[1].id)));
}

#[tokio::test]
async fn blank_credential_returns_nothing() {
    let ctx = context();
    deposit(
        &ctx,
        request("f.png", "Ohio", "Akron", "2024-01-01", b"img"),
        &pass("pw"),
        None,
        None,
    )
    .await
    .unwrap();
    let hits = search(&ctx, &RetrievalQuery::default(), &pass("   "), None, None)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn wrong_passphrase_finds_nothing_and_cannot_fetch() {
    let ctx = context();
    let receipt = deposit(
        &ctx,
        request("clip.mp4", "California", "Fresno", "2024-03-01", b"payload"),
        &pass("correct horse"),
        None,
        None,
    )
    .await
    .unwrap();

    let hits = search(
        &ctx,
        &query(Some("California"), None, None),
        &pass("wrong"),
        None,
        None,
    )
    .await
    .unwrap();
    assert!(hits.is_empty());

    let err = fetch_payload(&ctx, &receipt.record, &pass("wrong"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::WrongCredential), "got {err:?}");
}

#[tokio::test]
async fn backup_key_finds_and_fetches_exactly_its_item() {
    let ctx = context();
    let data = payload(CHUNK * 2);
    let mine = deposit(
        &ctx,
        request("clip.mp4", "California", "Fresno", "2024-03-01", &data),
        &pass("correct horse"),
        None,
        None,
    )
    .await
    .unwrap();
    deposit(
        &ctx,
        request("other.mp4", "California", "Fresno", "2024-03-01", b"other"),
        &pass("correct horse"),
        None,
        None,
    )
    .await
    .unwrap();

    // Lower-cased, groups separated by spaces: still the same key.
    let body = &mine.backup_key.as_str()["GV-".len()..];
    let typed = format!("gv-{}", body.to_lowercase().replace('-', " "));
    let hits = search(
        &ctx,
        &query(Some("Nevada"), None, None),
        &pass(&typed),
        None,
        None,
    )
    .await
    .unwrap();
    assert_eq!(hits.len(), 1, "sealed metadata cannot be filtered with a backup key");
    assert_eq!(hits[0].id, mine.record.id);
    assert_eq!(hits[0].status, RecordStatus::Locked);
    assert!(hits[0].metadata.is_none());

    let fetched = fetch_payload(&ctx, &hits[0], &pass(mine.backup_key.as_str()), None, None)
        .await
        .unwrap();
    assert_eq!(fetched, data);
}

#[tokio::test]
async fn foreign_backup_key_cannot_fetch() {
    let ctx = context();
    let a = deposit(
        &ctx,
        request("a.mp4", "CA", "Fresno", "2024-03-01", b"aaaa"),
        &pass("pw"),
        None,
        None,
    )
    .await
    .unwrap();
    let b = deposit(
        &ctx,
        request("b.mp4", "CA", "Fresno", "2024-03-01", b"bbbb"),
        &pass("pw"),
        None,
        None,
    )
    .await
    .unwrap();

    let err = fetch_payload(&ctx, &a.record, &pass(b.backup_key.as_str()), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::WrongCredential), "got {err:?}");
}

#[tokio::test]
async fn empty_payload_roundtrips() {
    let ctx = context();
    let receipt = deposit(
        &ctx,
        request("empty.txt", "CA", "Fresno", "2024-03-01", b""),
        &pass("pw"),
        None,
        None,
    )
    .await
    .unwrap();
    assert_eq!(receipt.record.size, 0);
    let out = fetch_payload(&ctx, &receipt.record, &pass("pw"), None, None)
        .await
        .unwrap();
    assert!(out.is_empty());
}

#[tokio::test]
async fn empty_payload_still_checks_backup_keys() {
    let ctx = context();
    let empty = deposit(
        &ctx,
        request("empty.txt", "CA", "Fresno", "2024-03-01", b""),
        &pass("pw"),
        None,
        None,
    )
    .await
    .unwrap();
    let other = deposit(
        &ctx,
        request("other.txt", "CA", "Fresno", "2024-03-01", b""),
        &pass("pw"),
        None,
        None,
    )
    .await
    .unwrap();
    let own_key = pass(empty.backup_key.as_str());
    let foreign_key = pass(other.backup_key.as_str());

    let err = fetch_payload(&ctx, &empty.record, &foreign_key, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::WrongCredential), "got {err:?}");
    let err = purge(&ctx, &empty.record, &foreign_key).await.unwrap_err();
    assert!(matches!(err, VaultError::WrongCredential), "got {err:?}");

    let out = fetch_payload(&ctx, &empty.record, &own_key, None, None)
        .await
        .unwrap();
    assert!(out.is_empty());
    purge(&ctx, &empty.record, &own_key).await.unwrap();
    assert!(find_record(&ctx, &empty.record.id).await.is_err());
}

#[tokio::test]
async fn streamed_deposit_and_fetch_of_many_chunks() {
    let ctx = context();
    let len = CHUNK as u64 * 40 + 3;
    let req = DepositRequest {
        payload: Box::new(std::io::repeat(0x5A).take(len)),
        size_hint: len,
        ..request("long.mkv", "CA", "Fresno", "2024-03-01", b"")
    };
    let receipt = deposit(&ctx, req, &pass("pw"), None, None).await.unwrap();
    assert_eq!(receipt.record.size, len);
    assert_eq!(receipt.record.metadata.as_ref().unwrap().mime_type, "video/x-matroska");

    let (out, summary) = fetch_into(&ctx, &receipt.record, &pass("pw"), Vec::new(), None, None)
        .await
        .unwrap();
    assert_eq!(summary.chunks, 41);
    assert_eq!(summary.plaintext_bytes, len);
    assert_eq!(out.len() as u64, len);
    assert!(out.iter().all(|b| *b == 0x5A));
}

#[tokio::test]
async fn passphrase_shaped_like_backup_key_is_refused() {
    let ctx = context();
    let err = deposit(
        &ctx,
        request("a.mp4", "CA", "Fresno", "2024-03-01", b"aaaa"),
        &pass(&"ab".repeat(32)),
        None,
        None,
    )
    .await
    .unwrap_err();
    match err {
        VaultError::DepositFailed { stage, source } => {
            assert_eq!(stage, DepositStage::Idle);
            assert!(matches!(*source, VaultError::InvalidInput(_)));
        }
        other => panic!("unexpected {other:?}"),
    }
    let rows = ctx
        .rows()
        .query(TABLE_VAULT, &Default::default())
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn find_record_by_id_is_locked() {
    let ctx = context();
    let receipt = deposit(
        &ctx,
        request("a.mp4", "CA", "Fresno", "2024-03-01", b"aaaa"),
        &pass("pw"),
        None,
        None,
    )
    .await
    .unwrap();

    let found = find_record(&ctx, &receipt.record.id).await.unwrap();
    assert_eq!(found.status, RecordStatus::Locked);
    assert_eq!(found.blob_path, receipt.record.blob_path);
    assert_eq!(
        fetch_payload(&ctx, &found, &pass("pw"), None, None).await.unwrap(),
        b"aaaa"
    );

    assert!(matches!(
        find_record(&ctx, "no-such-id").await,
        Err(VaultError::NotFound(_))
    ));
}

#[tokio::test]
async fn purge_requires_the_right_credential() {
    let ctx = context();
    let receipt = deposit(
        &ctx,
        request("a.mp4", "CA", "Fresno", "2024-03-01", b"aaaa"),
        &pass("pw"),
        None,
        None,
    )
    .await
    .unwrap();

    let err = purge(&ctx, &receipt.record, &pass("nope")).await.unwrap_err();
    assert!(matches!(err, VaultError::WrongCredential));
    assert!(ctx.blobs().get(&receipt.record.blob_path).await.is_ok());

    purge(&ctx, &receipt.record, &pass("pw")).await.unwrap();
    assert!(matches!(
        ctx.blobs().get(&receipt.record.blob_path).await,
        Err(VaultError::NotFound(_))
    ));
    let left = search(&ctx, &RetrievalQuery::default(), &pass("pw"), None, None)
        .await
        .unwrap();
    assert!(left.is_empty());
}

#[tokio::test]
async fn purge_with_backup_key() {
    let ctx = context();
    let receipt = deposit(
        &ctx,
        request("a.mp4", "CA", "Fresno", "2024-03-01", b"aaaa"),
        &pass("pw"),
        None,
        None,
    )
    .await
    .unwrap();
    purge(&ctx, &receipt.record, &pass(receipt.backup_key.as_str()))
        .await
        .unwrap();
    assert!(find_record(&ctx, &receipt.record.id).await.is_err());
}

#[tokio::test]
async fn owners_only_see_their_own_items() {
    let base = context();
    let alice = base.clone().with_owner("alice").unwrap();
    let bob = base.clone().with_owner("bob").unwrap();

    let receipt = deposit(
        &alice,
        request("a.mp4", "CA", "Fresno", "2024-03-01", b"aaaa"),
        &pass("shared"),
        None,
        None,
    )
    .await
    .unwrap();
    assert!(receipt.record.blob_path.starts_with("alice/"));

    let q = RetrievalQuery::default();
    assert_eq!(search(&alice, &q, &pass("shared"), None, None).await.unwrap().len(), 1);
    assert!(search(&bob, &q, &pass("shared"), None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn location_in_path_when_enabled() {
    let mut ctx = context();
    ctx.location_in_path = true;
    let receipt = deposit(
        &ctx,
        request("a.mp4", "New York", "Buffalo", "2024-03-01", b"aaaa"),
        &pass("pw"),
        None,
        None,
    )
    .await
    .unwrap();
    assert!(receipt.record.blob_path.starts_with("new_york/buffalo/"));
    assert!(receipt.record.blob_path.ends_with(".enc"));
}
