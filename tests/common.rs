//! Common test utilities shared between integration tests

#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};
use wastfront::diagnostics::{CollectedDiagnostic, CollectingReporter};
use wastfront::wast::Script;
use wastfront::wat::ParseFailed;

/// Captured writer that stores output for testing
#[derive(Clone, Default)]
pub struct CapturedWriter(pub Arc<Mutex<Vec<u8>>>);

impl CapturedWriter {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Parses a script, returning the result along with every diagnostic.
pub fn parse_collecting(source: &str) -> (Result<Script, ParseFailed>, Vec<CollectedDiagnostic>) {
    let mut reporter = CollectingReporter::new();
    let result = wastfront::parse_script(source, "test.wast", &mut reporter);
    (result, reporter.into_diagnostics())
}

/// Parses a script that must be free of errors.
pub fn parse_ok(source: &str) -> Script {
    match parse_collecting(source) {
        (Ok(script), _) => script,
        (Err(e), diagnostics) => panic!("{e}: {diagnostics:#?}"),
    }
}
