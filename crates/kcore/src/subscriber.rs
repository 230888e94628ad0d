use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    vec::Vec,
};
use core::{
    fmt::{Debug, Write},
    num::NonZeroU64,
    sync::atomic::{AtomicU64, Ordering},
};

use hal::{
    interrupts::{without, SpinLock},
    task::hw_thread_id,
};
use tracing::{
    field::{Field, Visit},
    level_filters::LevelFilter,
    span, Metadata, Subscriber,
};

use crate::stdio::stdout;

/// Writes `tracing` events to the kernel console, prefixed with the span stack of
/// the hardware thread that emitted them.
#[derive(Debug)]
pub struct KernelSubscriber {
    inner: SpinLock<Inner>,
    ids: AtomicU64,
    max_level: LevelFilter,
}

impl KernelSubscriber {
    pub fn new(max_level: LevelFilter) -> Self {
        Self {
            inner: SpinLock::new(Inner::default()),
            ids: AtomicU64::new(0),
            max_level,
        }
    }
}

impl Subscriber for KernelSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        *metadata.level() <= self.max_level
    }

    fn max_level_hint(&self) -> Option<LevelFilter> {
        Some(self.max_level)
    }

    fn new_span(&self, span: &span::Attributes<'_>) -> span::Id {
        let id = self.ids.fetch_add(1, Ordering::Relaxed) + 1;
        let id = NonZeroU64::new(id).expect("span id counter overflow");
        let id = span::Id::from_non_zero_u64(id);

        let mut fields = String::new();
        span.record(&mut Visitor(&mut fields));
        let span = OwnedSpan {
            name: span.metadata().name().to_string(),
            fields,
        };

        without(|g| self.inner.lock(g).spans.push(span));

        id
    }

    fn record(&self, span: &span::Id, values: &span::Record<'_>) {
        without(|g| {
            let mut inner = self.inner.lock(g);
            if let Some(span) = inner.get_mut(span) {
                values.record(&mut Visitor(&mut span.fields));
            }
        });
    }

    fn record_follows_from(&self, _span: &span::Id, _follows: &span::Id) {}

    fn event(&self, event: &tracing::Event<'_>) {
        // Also reached from interrupt context: no allocation past this point.
        without(|g| {
            let inner = self.inner.lock(g);
            _ = stdout().lock(|w| -> core::fmt::Result {
                write!(w, "{:>5}", event.metadata().level())?;
                let stack = inner.stacks.get(&hw_thread_id());
                for (i, id) in stack.into_iter().flatten().enumerate() {
                    w.write_char(if i == 0 { ' ' } else { ':' })?;
                    inner.describe(id, w)?;
                }
                event.record(&mut Visitor(&mut *w));
                w.write_char('\n')
            });
        });
    }

    fn enter(&self, span: &span::Id) {
        without(|g| {
            self.inner
                .lock(g)
                .stacks
                .entry(hw_thread_id())
                .or_default()
                .push(span.clone());
        });
    }

    fn exit(&self, span: &span::Id) {
        without(|g| {
            let mut inner = self.inner.lock(g);
            let Some(stack) = inner.stacks.get_mut(&hw_thread_id()) else {
                return;
            };
            if let Some(i) = stack.iter().rposition(|id| id == span) {
                stack.remove(i);
            }
        });
    }
}

struct Visitor<'a, W: ?Sized>(&'a mut W);

impl<'a, W: Write + ?Sized> Visit for Visitor<'a, W> {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            _ = write!(self.0, " {:?}", value);
        } else {
            _ = write!(self.0, " {}={:?}", field.name(), value);
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    spans: Vec<OwnedSpan>,
    /// Entered spans per hardware thread, innermost last.
    stacks: BTreeMap<usize, Vec<span::Id>>,
}

impl Inner {
    fn index(id: &span::Id) -> usize {
        (id.into_u64() - 1) as usize
    }

    fn get_mut(&mut self, id: &span::Id) -> Option<&mut OwnedSpan> {
        self.spans.get_mut(Self::index(id))
    }

    fn describe<W: Write + ?Sized>(&self, id: &span::Id, out: &mut W) -> core::fmt::Result {
        match self.spans.get(Self::index(id)) {
            Some(span) if span.fields.is_empty() => out.write_str(&span.name),
            Some(span) => write!(out, "{}{{{}}}", span.name, span.fields),
            None => out.write_char('?'),
        }
    }
}

#[derive(Debug)]
struct OwnedSpan {
    name: String,
    fields: String,
}
