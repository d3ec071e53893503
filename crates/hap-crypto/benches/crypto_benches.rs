use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hap_crypto::chacha::SessionCipher;
use hap_crypto::curve25519::EcdhKeyPair;
use hap_crypto::ed25519::{self, IdentityKeyPair};
use hap_crypto::keys::{SessionKeys, SharedSecret};
use hap_crypto::srp::{SrpChallenge, SrpClient, SrpServer, SRP_USERNAME};
use hap_crypto::tlv::{Tlv8, TlvType};

fn session_keys() -> SessionKeys {
    SessionKeys::derive_control_keys(&SharedSecret::new(vec![0x42u8; 32])).unwrap()
}

/// Benchmark session frame encryption (accessory responses and events).
fn bench_session_encryption(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_encryption");

    for size in [128, 1024, 4096] {
        group.throughput(Throughput::Bytes(size as u64));

        let mut cipher = SessionCipher::accessory(&session_keys());
        let plaintext = vec![0xABu8; size];

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| cipher.encrypt(black_box(&plaintext)));
        });
    }

    group.finish();
}

/// Benchmark session frame decryption (controller requests).
fn bench_session_decryption(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_decryption");

    for size in [128, 1024, 4096] {
        group.throughput(Throughput::Bytes(size as u64));
        let plaintext = vec![0xABu8; size];

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter_batched(
                || {
                    let keys = session_keys();
                    let framed = SessionCipher::controller(&keys).encrypt(&plaintext).unwrap();
                    (SessionCipher::accessory(&keys), framed)
                },
                |(mut accessory, framed)| accessory.decrypt(black_box(&framed)),
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark the accessory's SRP work for one pair-setup (B, then S and proofs).
///
/// Dominates pair-setup latency on small accessories.
fn bench_srp_server(c: &mut Criterion) {
    let mut group = c.benchmark_group("srp_server");
    group.sample_size(10);

    group.bench_function("verifier", |b| {
        b.iter(|| SrpServer::new(SRP_USERNAME, black_box(b"123-45-678"), [0x42; 16]));
    });

    group.bench_function("verify_client", |b| {
        b.iter_batched(
            || {
                let server = SrpServer::new(SRP_USERNAME, b"123-45-678", [0x42; 16]);
                let client = SrpClient::new(SRP_USERNAME, b"123-45-678");
                let proof = client
                    .process_challenge(&SrpChallenge {
                        salt: server.salt(),
                        server_public_key: server.public_key(),
                    })
                    .unwrap();
                (server, client.public_key(), proof.client_proof)
            },
            |(server, a, m1)| server.verify_client(&a, &m1),
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

/// Benchmark the per-connection pair-verify primitives.
fn bench_pair_verify_primitives(c: &mut Criterion) {
    let identity = IdentityKeyPair::generate();
    let transcript = vec![0x11u8; 32 + 17 + 32];
    let signature = identity.sign(&transcript);

    c.bench_function("ed25519_sign", |b| {
        b.iter(|| identity.sign(black_box(&transcript)));
    });

    c.bench_function("ed25519_verify", |b| {
        b.iter(|| ed25519::verify(&identity.public_key(), black_box(&transcript), &signature));
    });

    let peer = EcdhKeyPair::generate().public_key();
    c.bench_function("x25519_ephemeral", |b| {
        b.iter(|| EcdhKeyPair::generate().diffie_hellman(black_box(&peer)));
    });
}

/// Benchmark TLV8 encode/parse of a pair-setup M4-sized message.
fn bench_tlv(c: &mut Criterion) {
    let mut tlv = Tlv8::with_state(0x02);
    tlv.set(TlvType::Salt, vec![0x42u8; 16]);
    tlv.set(TlvType::PublicKey, vec![0xABu8; 384]);
    let encoded = tlv.encode();

    c.bench_function("tlv_encode", |b| b.iter(|| black_box(&tlv).encode()));
    c.bench_function("tlv_parse", |b| b.iter(|| Tlv8::parse(black_box(&encoded))));
}

criterion_group!(
    benches,
    bench_session_encryption,
    bench_session_decryption,
    bench_srp_server,
    bench_pair_verify_primitives,
    bench_tlv,
);

criterion_main!(benches);
