use gv_crypto::{
    blind_index, decrypt_bytes, derive_kek, encrypt_bytes, generate_dek, KdfParams, Sik,
};
use secrecy::SecretString;

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

const CHUNK: usize = 1024 * 1024;

#[divan::bench(args = [1024, 65536, 4194304])]
fn bench_encrypt_payload(bencher: divan::Bencher, size: usize) {
    let dek = generate_dek();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt_bytes(divan::black_box(&data), divan::black_box(&dek), CHUNK).unwrap());
}

#[divan::bench(args = [1024, 65536, 4194304])]
fn bench_decrypt_payload(bencher: divan::Bencher, size: usize) {
    let dek = generate_dek();
    let blob = encrypt_bytes(&make_data(size), &dek, CHUNK).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| decrypt_bytes(divan::black_box(&blob), divan::black_box(&dek), CHUNK).unwrap());
}

#[divan::bench(args = [10_000, 100_000])]
fn bench_derive_kek(bencher: divan::Bencher, iterations: u32) {
    let passphrase = SecretString::from("correct horse battery staple");
    let params = KdfParams { iterations };
    bencher.bench(|| derive_kek(divan::black_box(&passphrase), &[7u8; 16], &params).unwrap());
}

#[divan::bench]
fn bench_blind_index(bencher: divan::Bencher) {
    let sik = Sik::from_bytes([9u8; 32]);
    bencher.bench(|| blind_index(divan::black_box("  Fresno "), &sik).unwrap());
}

fn main() {
    divan::main();
}
