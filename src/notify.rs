//! Debounce notifier.
//!
//! Holds the last label that was *successfully* written to the actuator link
//! and sends a new line only when a confident decision names a different
//! label. Guarantees at most one notification per distinct label transition.
//!
//! Wire format: the label text followed by a single `\n`. No framing, no
//! acknowledgement. A write that returns `Ok` and a flush that returns `Ok`
//! count as delivered.

use std::io::Write;

use crate::decision::Decision;
use crate::labels::Label;
use crate::NotifyTransportError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    Unconfident,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Unconfident => "unconfident",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotifyResult {
    Sent(Label),
    /// Confident, but the same label was already transmitted.
    Suppressed,
    Skipped(SkipReason),
}

pub struct DebounceNotifier<W: Write> {
    link: W,
    last_transmitted: Option<Label>,
}

impl<W: Write> DebounceNotifier<W> {
    pub fn new(link: W) -> Self {
        Self {
            link,
            last_transmitted: None,
        }
    }

    pub fn last_transmitted(&self) -> Option<&Label> {
        self.last_transmitted.as_ref()
    }

    pub fn link(&self) -> &W {
        &self.link
    }

    /// Release the link. Dropping the notifier has the same effect.
    pub fn into_link(self) -> W {
        self.link
    }

    pub fn maybe_notify(
        &mut self,
        decision: &Decision,
    ) -> Result<NotifyResult, NotifyTransportError> {
        if !decision.confident {
            return Ok(NotifyResult::Skipped(SkipReason::Unconfident));
        }
        if self.last_transmitted.as_ref() == Some(&decision.label) {
            return Ok(NotifyResult::Suppressed);
        }

        self.transmit(&decision.label)
            .map_err(|source| NotifyTransportError {
                label: decision.label.name().to_string(),
                source,
            })?;

        // Advance only after the line is written and flushed.
        self.last_transmitted = Some(decision.label.clone());
        Ok(NotifyResult::Sent(decision.label.clone()))
    }

    fn transmit(&mut self, label: &Label) -> std::io::Result<()> {
        let mut line = String::with_capacity(label.name().len() + 1);
        line.push_str(label.name());
        line.push('\n');
        self.link.write_all(line.as_bytes())?;
        self.link.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelMap;
    use std::io;

    fn decision(labels: &LabelMap, index: usize, confident: bool) -> Decision {
        Decision {
            label: labels.get(index).unwrap().clone(),
            confidence: if confident { 0.9 } else { 0.3 },
            confident,
        }
    }

    fn labels() -> LabelMap {
        LabelMap::new(["Circulo", "Triangulo", "Vazio"]).unwrap()
    }

    /// Link that rejects the first `failures` writes.
    struct FlakyLink {
        written: Vec<u8>,
        failures: usize,
    }

    impl Write for FlakyLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "port unplugged"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn repeated_label_is_sent_once() {
        let labels = labels();
        let mut notifier = DebounceNotifier::new(Vec::new());
        let first = notifier.maybe_notify(&decision(&labels, 0, true)).unwrap();
        assert_eq!(first, NotifyResult::Sent(labels.get(0).unwrap().clone()));
        for _ in 0..4 {
            let result = notifier.maybe_notify(&decision(&labels, 0, true)).unwrap();
            assert_eq!(result, NotifyResult::Suppressed);
        }
        assert_eq!(notifier.link().as_slice(), b"Circulo\n");
    }

    #[test]
    fn unconfident_frame_does_not_reset_memory() {
        let labels = labels();
        let mut notifier = DebounceNotifier::new(Vec::new());
        let results: Vec<NotifyResult> = [
            decision(&labels, 1, true),
            decision(&labels, 2, false),
            decision(&labels, 1, true),
        ]
        .iter()
        .map(|d| notifier.maybe_notify(d).unwrap())
        .collect();

        assert!(matches!(results[0], NotifyResult::Sent(_)));
        assert_eq!(results[1], NotifyResult::Skipped(SkipReason::Unconfident));
        assert_eq!(results[2], NotifyResult::Suppressed);
        assert_eq!(notifier.last_transmitted().unwrap().name(), "Triangulo");
    }

    #[test]
    fn each_transition_is_announced() {
        let labels = labels();
        let mut notifier = DebounceNotifier::new(Vec::new());
        for index in [0, 2, 0, 1] {
            notifier.maybe_notify(&decision(&labels, index, true)).unwrap();
        }
        assert_eq!(
            String::from_utf8(notifier.into_link()).unwrap(),
            "Circulo\nVazio\nCirculo\nTriangulo\n"
        );
    }

    #[test]
    fn failed_write_keeps_label_pending() {
        let labels = labels();
        let link = FlakyLink {
            written: Vec::new(),
            failures: 1,
        };
        let mut notifier = DebounceNotifier::new(link);

        let err = notifier
            .maybe_notify(&decision(&labels, 2, true))
            .unwrap_err();
        assert_eq!(err.label, "Vazio");
        assert!(notifier.last_transmitted().is_none());

        let retry = notifier.maybe_notify(&decision(&labels, 2, true)).unwrap();
        assert!(matches!(retry, NotifyResult::Sent(ref label) if label.name() == "Vazio"));
        assert_eq!(notifier.link().written, b"Vazio\n");
    }
}
