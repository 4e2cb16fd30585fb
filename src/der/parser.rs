use crate::der::buffer::Buffer;
use crate::der::path::{NodeKind, Path, PathNode};
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Maximum number of nested path nodes a decode will build. Every nesting
/// level multiplies the path permutations a handler lookup has to consider,
/// so adversarial input made of many cheap nested headers is refused here
/// rather than by overall buffer size.
pub const MAX_PERMUTATIONS: usize = 17;

/// Callback invoked with the decode state and the content of a matching element.
pub type ParseHandler<S> = Box<dyn Fn(&mut S, &mut Buffer<'_>) -> Result<()> + Send + Sync>;

/// Recursive-descent BER parser that dispatches element contents to handlers
/// registered at paths.
///
/// While descending, each element gets a concrete path node whose index is its
/// occurrence among same-tag siblings. A registered path fires for an element
/// when it selects the element's concrete path (see [`Path::selects`]), so
/// `/SEQ/OCTSTR` fires once per OCTET STRING inside the SEQUENCE while
/// `/SEQ/OCTSTR[1]` fires only for the second one.
///
/// Primitive elements are dispatched as soon as they are read. Constructed
/// elements are descended into first and dispatched afterwards, once per
/// occurrence, with a buffer over their whole content.
pub struct DerParser<S> {
    handlers: Vec<(Path, ParseHandler<S>)>,
}

impl<S> Default for DerParser<S> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }
}

impl<S> DerParser<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` at the path written as `path`.
    pub fn on<F>(mut self, path: &str, handler: F) -> Result<Self>
    where
        F: Fn(&mut S, &mut Buffer<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.register(path.parse()?, handler);
        Ok(self)
    }

    pub fn register<F>(&mut self, path: Path, handler: F)
    where
        F: Fn(&mut S, &mut Buffer<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.push((path, Box::new(handler)));
    }

    /// Decode `data`, which must consist entirely of well-formed, definite-length elements.
    pub fn parse(&self, state: &mut S, data: &[u8]) -> Result<()> {
        let mut buf = Buffer::new(data);
        let mut path = Path::new();
        self.parse_container(state, &mut buf, &mut path)
    }

    fn parse_container(&self, state: &mut S, buf: &mut Buffer<'_>, path: &mut Path) -> Result<()> {
        let mut occurrences: HashMap<NodeKind, usize> = HashMap::new();
        while buf.has_remaining() {
            let tag = buf.read_tag()?;
            let kind = NodeKind::from_tag(tag)?;
            let len = buf.read_length()?;
            let content = buf.sub_buffer(len)?;

            let seen = occurrences.entry(kind).or_insert(0);
            let index = *seen;
            *seen += 1;

            path.push(PathNode::with_index(kind, index));
            if path.len() > MAX_PERMUTATIONS {
                return Err(Error::decode(format!(
                    "nesting exceeds {} levels at {}",
                    MAX_PERMUTATIONS, path
                )));
            }
            if tag.is_constructed() {
                self.parse_container(state, &mut content.clone(), path)?;
            }
            self.dispatch(state, path, &content)?;
            path.pop();
        }
        Ok(())
    }

    fn dispatch(&self, state: &mut S, path: &Path, content: &Buffer<'_>) -> Result<()> {
        for (registered, handler) in &self.handlers {
            if registered.selects(path) {
                handler(state, &mut content.clone())?;
            }
        }
        Ok(())
    }
}
