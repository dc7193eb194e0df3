use webhook_notifier::{compute_signature, parse_authorization_header, verify_signature, SignatureAlgorithm};

fn main() {
    let secret = "merchant-secret";
    let body = br#"{"id":"5d1b4a3c","type":"notification","event":"payment.success"}"#;

    // What the notifier sends for the default protocol.
    let header = format!("Signature {}", compute_signature(SignatureAlgorithm::Sha256, body, secret));

    let valid = parse_authorization_header(&header)
        .map(|signature| verify_signature(SignatureAlgorithm::Sha256, body, secret, signature))
        .unwrap_or(false);

    println!("signature valid: {valid}");
}
