//! Chunk assembly
//!
//! Pulls rows from a [`RecordSource`], parses them and groups the results
//! into chunks of at most `chunk_size` items. Parse failures keep their
//! slot as [`ChunkItem::Malformed`].

use tracing::{debug, trace};

use crate::error::{ImportError, ImportResult, ParseError};

use super::parser::RecordParser;
use super::source::{RecordSource, SourceError};
use super::types::{Chunk, ChunkItem};

pub struct ChunkAssembler<S, P> {
    source: S,
    parser: P,
    chunk_size: usize,
    chunks_emitted: u64,
    exhausted: bool,
}

impl<S, P> ChunkAssembler<S, P>
where
    S: RecordSource,
    P: RecordParser,
{
    pub fn new(source: S, parser: P, chunk_size: usize) -> ImportResult<Self> {
        if chunk_size == 0 {
            return Err(ImportError::Config("chunk_size must be greater than 0".to_string()));
        }
        Ok(Self {
            source,
            parser,
            chunk_size,
            chunks_emitted: 0,
            exhausted: false,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Next chunk, a shorter final chunk, or `None` once the source is empty
    ///
    /// Only an I/O failure of the source is returned as an error.
    pub fn next_chunk(&mut self) -> ImportResult<Option<Chunk>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut items = Vec::with_capacity(self.chunk_size);
        while items.len() < self.chunk_size {
            match self.source.next_row() {
                Ok(Some(row)) => {
                    let item = match self.parser.parse(&row) {
                        Ok(reading) => ChunkItem::Record {
                            line: row.line,
                            reading,
                        },
                        Err(err) => {
                            trace!(line = row.line, reason = %err.reason, "Row failed to parse");
                            ChunkItem::Malformed(err)
                        },
                    };
                    items.push(item);
                },
                Ok(None) => {
                    self.exhausted = true;
                    break;
                },
                Err(SourceError::Malformed { line, reason, raw }) => {
                    items.push(ChunkItem::Malformed(ParseError::new(line, reason, raw)));
                },
                Err(SourceError::Io(reason)) => {
                    return Err(ImportError::SourceRead(reason));
                },
            }
        }

        if items.is_empty() {
            return Ok(None);
        }

        self.chunks_emitted += 1;
        let chunk = Chunk::new(self.chunks_emitted, items);
        debug!(
            chunk = chunk.number(),
            items = chunk.len(),
            records = chunk.record_count(),
            "Assembled chunk"
        );
        Ok(Some(chunk))
    }
}
