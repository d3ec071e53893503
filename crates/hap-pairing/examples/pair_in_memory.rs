//! Pair a controller with an in-memory accessory and open a session.
//!
//! Run with: cargo run -p hap-pairing --example pair_in_memory -- [setup-code]

use hap_core::config::PairingConfig;
use hap_pairing::{
    Accessory, AccessoryIdentity, ControllerIdentity, MemoryStore, Reply, SetupClient,
    VerifyClient,
};
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(true)
        .init();

    let code = std::env::args().nth(1).unwrap_or_else(|| "123-45-678".to_string());
    let config = PairingConfig::with_setup_code(&code)?;
    println!("=== HAP pairing demo (setup code {}) ===", config.setup_code);

    let store = Arc::new(MemoryStore::new(AccessoryIdentity::generate(
        "DE:65:74:40:75:62",
    )));
    let accessory = Accessory::new(store, config);
    let controller = ControllerIdentity::generate();
    println!("Controller id: {}", controller.id());

    // Pair-setup on connection 1
    let mut setup = SetupClient::new(&code);
    let m2 = accessory.pair_setup(1, &setup.start())?.response();
    let m4 = accessory.pair_setup(1, &setup.handle_m2(&m2)?)?.response();
    setup.handle_m4(&m4)?;
    let m6 = accessory.pair_setup(1, &setup.exchange(&controller)?)?.response();
    let paired = setup.handle_m6(&m6)?;
    println!("Paired with accessory {}", paired.mac_id);
    accessory.disconnect(1);

    // Pair-verify on connection 2
    let mut verify = VerifyClient::new(paired.public_key);
    let m2 = accessory.pair_verify(2, &verify.start())?.response();
    verify.handle_m2(&m2)?;
    let reply = accessory.pair_verify(2, &verify.finish(&controller)?)?;
    let (response, session) = match reply {
        Reply::Verified { response, session } => (response, session),
        other => {
            eprintln!("Pair-verify did not complete: {:?}", other);
            std::process::exit(1);
        }
    };
    let mut controller_cipher = verify.handle_m4(&response)?;
    let mut accessory_cipher = session.cipher;

    let frame = controller_cipher.encrypt(b"GET /accessories HTTP/1.1\r\n\r\n")?;
    let request = accessory_cipher.decrypt(&frame)?;
    println!(
        "Accessory decrypted {} byte request: {:?}",
        request.len(),
        String::from_utf8_lossy(&request).trim_end()
    );

    accessory.disconnect(2);
    Ok(())
}
