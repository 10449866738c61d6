//! TLS-Acceptor aus PEM-Dateien
//!
//! Laedt Zertifikatskette und privaten Schluessel fuer einen Listener.
//! Listener ohne konfigurierte Pfade laufen im Klartext (TLS-Terminierung
//! uebernimmt dann ein vorgelagerter Proxy).

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use anyhow::Context;
use tokio_rustls::TlsAcceptor;

use crate::config::ListenerEinstellungen;

/// Baut den TLS-Acceptor eines Listeners, falls Pfade konfiguriert sind
pub fn acceptor_fuer(listener: &ListenerEinstellungen) -> anyhow::Result<Option<TlsAcceptor>> {
    let (Some(zert_pfad), Some(schluessel_pfad)) =
        (&listener.tls_zertifikat, &listener.tls_schluessel)
    else {
        return Ok(None);
    };

    let zertifikate = rustls_pemfile::certs(&mut BufReader::new(
        File::open(zert_pfad).with_context(|| format!("Zertifikat {} oeffnen", zert_pfad))?,
    ))
    .collect::<Result<Vec<_>, _>>()
    .with_context(|| format!("Zertifikat {} lesen", zert_pfad))?;

    let schluessel = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(schluessel_pfad)
            .with_context(|| format!("Schluessel {} oeffnen", schluessel_pfad))?,
    ))
    .with_context(|| format!("Schluessel {} lesen", schluessel_pfad))?
    .ok_or_else(|| anyhow::anyhow!("Kein privater Schluessel in {}", schluessel_pfad))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(zertifikate, schluessel)
        .context("TLS-Konfiguration bauen")?;

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}
