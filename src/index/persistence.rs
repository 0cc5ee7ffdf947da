//! Save/load: self-describing sidecar files under a path prefix.
//!
//! Layout for prefix `P`:
//!
//! ```text
//! P.meta.json   config + slot bookkeeping (serde_json)
//! P.data        u32 npts, u32 aligned_dim, npts × aligned_dim elements (LE)
//! P.graph       u32 npts, u32 max_degree, per slot: u32 len + neighbors
//! P.tags        u32 npts, u32 1, npts × u32 (TAG_NONE for untagged slots)
//! P.labels      u32 npts, u32 1, per slot: u32 count + label ids
//! ```
//!
//! Compact mode remaps surviving slots to `[0, npts)` and drops tombstoned
//! slots (and edges into them) on the way out.

use super::DynamicIndex;
use crate::distance::{DataType, Element, Metric};
use crate::error::{IndexError, Result};
use crate::labels::LabelIndex;
use crate::params::IndexWriteParameters;
use crate::store::{SlotState, TagMap, TAG_NONE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const META_FORMAT: &str = "freshet-index";
const META_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct IndexMeta {
    format: String,
    version: u32,
    data_type: DataType,
    metric: Metric,
    dim: usize,
    aligned_dim: usize,
    capacity: usize,
    npts: u32,
    compact: bool,
    params: IndexWriteParameters,
    start_points: Vec<u32>,
    universal_label: Option<u32>,
    medoids: Vec<(u32, u32)>,
    delete_set: Vec<u32>,
    max_norm: Option<f32>,
}

fn sidecar(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

fn write_u32<W: Write>(w: &mut W, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u32<R: Read>(r: &mut R) -> std::io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn check_npts(file: &str, got: u32, want: u32) -> Result<()> {
    if got != want {
        return Err(IndexError::Io(format!(
            "{file} sidecar holds {got} slots, metadata says {want}"
        )));
    }
    Ok(())
}

impl<T: Element> DynamicIndex<T> {
    /// Persist the index under `prefix`. Takes the consolidation gate
    /// exclusively (blocking), so the snapshot is stable against inserts.
    ///
    /// With `compact`, surviving slots are renumbered to `[0, n)` and
    /// tombstoned slots are dropped along with edges into them.
    pub fn save<P: AsRef<Path>>(&self, prefix: P, compact: bool) -> Result<()> {
        let prefix = prefix.as_ref();
        let _gate = self.gate.write();

        let total = self.graph.total_slots();
        let mut remap: Vec<u32> = vec![TAG_NONE; total];
        let mut emit: Vec<u32> = Vec::with_capacity(total);
        for s in 0..total as u32 {
            let keep = if compact {
                matches!(self.states.get(s), SlotState::Live | SlotState::Frozen)
            } else {
                true
            };
            if keep {
                remap[s as usize] = emit.len() as u32;
                emit.push(s);
            }
        }
        let npts = emit.len() as u32;

        // .data
        {
            let mut w = BufWriter::new(File::create(sidecar(prefix, ".data"))?);
            write_u32(&mut w, npts)?;
            write_u32(&mut w, self.aligned_dim as u32)?;
            let mut bytes = Vec::with_capacity(self.aligned_dim * std::mem::size_of::<T>());
            for &old in &emit {
                bytes.clear();
                T::write_le(self.vectors.vector(old), &mut bytes);
                w.write_all(&bytes)?;
            }
            w.flush()?;
        }

        // .graph
        {
            let mut w = BufWriter::new(File::create(sidecar(prefix, ".graph"))?);
            write_u32(&mut w, npts)?;
            write_u32(&mut w, self.params.max_degree)?;
            for &old in &emit {
                let list: Vec<u32> = self
                    .graph
                    .snapshot(old)
                    .iter()
                    .filter_map(|&u| {
                        let nu = remap[u as usize];
                        (nu != TAG_NONE).then_some(nu)
                    })
                    .collect();
                write_u32(&mut w, list.len() as u32)?;
                for nu in list {
                    write_u32(&mut w, nu)?;
                }
            }
            w.flush()?;
        }

        // .tags
        {
            let tags = self.tags.read();
            let mut w = BufWriter::new(File::create(sidecar(prefix, ".tags"))?);
            write_u32(&mut w, npts)?;
            write_u32(&mut w, 1)?;
            for &old in &emit {
                write_u32(&mut w, tags.tag_of(old).unwrap_or(TAG_NONE))?;
            }
            w.flush()?;
        }

        // .labels
        if self.params.has_labels {
            let mut w = BufWriter::new(File::create(sidecar(prefix, ".labels"))?);
            write_u32(&mut w, npts)?;
            write_u32(&mut w, 1)?;
            for &old in &emit {
                let set = self.labels.labels_of(old);
                write_u32(&mut w, set.len() as u32)?;
                for &l in &set {
                    write_u32(&mut w, l)?;
                }
            }
            w.flush()?;
        }

        let delete_set: Vec<u32> = if compact {
            Vec::new()
        } else {
            let mut v: Vec<u32> = self.delete_set.read().iter().copied().collect();
            v.sort_unstable();
            v
        };
        let meta = IndexMeta {
            format: META_FORMAT.to_string(),
            version: META_VERSION,
            data_type: T::DATA_TYPE,
            metric: self.metric,
            dim: self.dim,
            aligned_dim: self.aligned_dim,
            capacity: self.capacity,
            npts,
            compact,
            params: self.params.clone(),
            start_points: self
                .start_points
                .read()
                .iter()
                .map(|&s| remap[s as usize])
                .collect(),
            universal_label: self.labels.universal(),
            medoids: self
                .labels
                .medoid_entries()
                .into_iter()
                .filter_map(|(l, s)| {
                    let ns = remap[s as usize];
                    (ns != TAG_NONE).then_some((l, ns))
                })
                .collect(),
            delete_set,
            max_norm: self.lift.as_ref().map(|l| l.max_norm()),
        };
        let w = BufWriter::new(File::create(sidecar(prefix, ".meta.json"))?);
        serde_json::to_writer_pretty(w, &meta).map_err(|e| IndexError::Io(e.to_string()))?;

        tracing::info!(prefix = %prefix.display(), npts, compact, "index saved");
        Ok(())
    }

    /// Reconstruct an index previously written by [`DynamicIndex::save`].
    pub fn load<P: AsRef<Path>>(prefix: P) -> Result<Self> {
        let prefix = prefix.as_ref();

        let meta: IndexMeta =
            serde_json::from_reader(BufReader::new(File::open(sidecar(prefix, ".meta.json"))?))
                .map_err(|e| IndexError::Io(e.to_string()))?;
        if meta.format != META_FORMAT || meta.version != META_VERSION {
            return Err(IndexError::Io(format!(
                "unrecognized index format {}/{}",
                meta.format, meta.version
            )));
        }
        if meta.data_type != T::DATA_TYPE {
            return Err(IndexError::InvalidParameter(format!(
                "stored element type {:?} does not match the requested one {:?}",
                meta.data_type,
                T::DATA_TYPE
            )));
        }

        let index = Self::new(meta.metric, meta.dim, meta.capacity, meta.params.clone())?;
        if meta.aligned_dim != index.aligned_dim {
            return Err(IndexError::Io(format!(
                "stored aligned dimension {} does not match the derived one {}",
                meta.aligned_dim, index.aligned_dim
            )));
        }
        let total = index.graph.total_slots();
        if meta.npts as usize > total {
            return Err(IndexError::Io(format!(
                "stored index holds {} slots but the configuration allows {total}",
                meta.npts
            )));
        }

        // .data
        {
            let mut r = BufReader::new(File::open(sidecar(prefix, ".data"))?);
            check_npts("data", read_u32(&mut r)?, meta.npts)?;
            let width = read_u32(&mut r)? as usize;
            if width != index.aligned_dim {
                return Err(IndexError::Io(format!(
                    "data sidecar width {width} does not match aligned dimension {}",
                    index.aligned_dim
                )));
            }
            let mut bytes = vec![0u8; width * std::mem::size_of::<T>()];
            let mut row = vec![T::default(); width];
            for slot in 0..meta.npts {
                r.read_exact(&mut bytes)?;
                T::read_le(&bytes, &mut row);
                index.vectors.write(slot, &row);
            }
        }

        // .graph
        {
            let mut r = BufReader::new(File::open(sidecar(prefix, ".graph"))?);
            check_npts("graph", read_u32(&mut r)?, meta.npts)?;
            let _max_degree = read_u32(&mut r)?;
            for slot in 0..meta.npts {
                let len = read_u32(&mut r)? as usize;
                if len > index.params.max_degree as usize {
                    return Err(IndexError::Io(format!(
                        "slot {slot} carries {len} neighbors, above the degree bound"
                    )));
                }
                let mut list = crate::graph::AdjList::with_capacity(len);
                for _ in 0..len {
                    let u = read_u32(&mut r)?;
                    if u >= meta.npts {
                        return Err(IndexError::Io(format!(
                            "slot {slot} points at out-of-range slot {u}"
                        )));
                    }
                    list.push(u);
                }
                index.graph.set(slot, list);
            }
        }

        // .tags
        let mut slot_to_tag = vec![TAG_NONE; total];
        {
            let mut r = BufReader::new(File::open(sidecar(prefix, ".tags"))?);
            check_npts("tags", read_u32(&mut r)?, meta.npts)?;
            let _one = read_u32(&mut r)?;
            for entry in slot_to_tag.iter_mut().take(meta.npts as usize) {
                *entry = read_u32(&mut r)?;
            }
        }

        // .labels
        if meta.params.has_labels {
            let mut r = BufReader::new(File::open(sidecar(prefix, ".labels"))?);
            check_npts("labels", read_u32(&mut r)?, meta.npts)?;
            let _one = read_u32(&mut r)?;
            for slot in 0..meta.npts {
                let count = read_u32(&mut r)? as usize;
                let mut set = Vec::with_capacity(count);
                for _ in 0..count {
                    set.push(read_u32(&mut r)?);
                }
                if !set.is_empty() {
                    index.labels.record(slot, &set);
                }
            }
        }

        // Rebuild bookkeeping: states, tag map, entry points, medoids.
        let deleted: HashSet<u32> = meta.delete_set.iter().copied().collect();
        for slot in 0..meta.npts {
            if meta.start_points.contains(&slot) {
                index.states.set(slot, SlotState::Frozen);
            } else if slot_to_tag[slot as usize] != TAG_NONE {
                let state = if deleted.contains(&slot) { SlotState::Tombstoned } else { SlotState::Live };
                index.states.set(slot, state);
            }
        }
        *index.tags.write() = TagMap::rebuild(slot_to_tag, &meta.start_points);
        *index.start_points.write() = meta.start_points.clone();
        *index.delete_set.write() = deleted;
        rebuild_labels(&index.labels, &meta);
        if let (Some(lift), Some(m)) = (&index.lift, meta.max_norm) {
            lift.set_max_norm(m);
        }

        tracing::info!(prefix = %prefix.display(), npts = meta.npts, "index loaded");
        Ok(index)
    }
}

fn rebuild_labels(labels: &LabelIndex, meta: &IndexMeta) {
    if let Some(u) = meta.universal_label {
        labels.set_universal(u);
    }
    for &(label, slot) in &meta.medoids {
        labels.restore_medoid(label, slot);
    }
}
