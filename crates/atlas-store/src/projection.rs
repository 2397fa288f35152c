//! Projection oracle over daemon-written entity embeddings.
//!
//! Embeddings are read from the optional `entity_embeddings` table, centred,
//! and projected onto their top three principal components (power iteration
//! with deflation). The result is scaled so the farthest entity sits on the
//! outer edge of the fallback spiral, which keeps both layouts at the same
//! visual scale.

use rusqlite::types::ValueRef;

use atlas_core::{GraphId, Projection, ProjectionOracle, Vec3};

use crate::error::{Result, StoreError};
use crate::store::Store;

const POWER_ITERATIONS: usize = 96;
const COMPONENTS: usize = 3;

/// Outer radius of the fallback spiral for `n` entities.
pub fn spiral_radius(n: usize) -> f64 {
    let n = n as f64;
    28.0 + n.sqrt() * 16.5
}

/// Decode one stored embedding: a JSON array of numbers (text) or packed
/// little-endian `f32` (blob). Anything else is `None`.
pub fn decode_embedding(value: ValueRef<'_>) -> Option<Vec<f64>> {
    let vector: Vec<f64> = match value {
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).ok()?;
            serde_json::from_str(text).ok()?
        }
        ValueRef::Blob(bytes) => {
            if bytes.is_empty() || bytes.len() % 4 != 0 {
                return None;
            }
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
                .collect()
        }
        _ => return None,
    };
    (!vector.is_empty() && vector.iter().all(|v| v.is_finite())).then_some(vector)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(v: &mut [f64]) -> bool {
    let norm = dot(v, v).sqrt();
    if norm < 1e-12 {
        return false;
    }
    v.iter_mut().for_each(|x| *x /= norm);
    true
}

/// Top `COMPONENTS` principal axes of the centred rows. Fewer are returned
/// when the data has lower rank.
pub fn principal_axes(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let Some(dim) = rows.first().map(Vec::len) else {
        return Vec::new();
    };
    let mut axes: Vec<Vec<f64>> = Vec::with_capacity(COMPONENTS);
    for k in 0..COMPONENTS.min(dim) {
        // deterministic, uneven start so it is not orthogonal to the data
        let mut v: Vec<f64> = (0..dim)
            .map(|i| 1.0 + ((i * (k + 1) * 7919) % 101) as f64)
            .collect();
        let mut converged = true;
        for _ in 0..POWER_ITERATIONS {
            // w = Xᵀ X v
            let mut w = vec![0.0; dim];
            for row in rows {
                let proj = dot(row, &v);
                for (wi, xi) in w.iter_mut().zip(row) {
                    *wi += proj * xi;
                }
            }
            for axis in &axes {
                let overlap = dot(&w, axis);
                for (wi, ai) in w.iter_mut().zip(axis) {
                    *wi -= overlap * ai;
                }
            }
            if !normalize(&mut w) {
                converged = false;
                break;
            }
            v = w;
        }
        if !converged {
            break;
        }
        axes.push(v);
    }
    axes
}

/// Project `(entity_id, embedding)` rows into 3D. Rows whose dimension
/// differs from the first row's are skipped. `None` when fewer than two
/// usable rows remain.
pub fn project_embeddings(rows: &[(i64, Vec<f64>)]) -> Option<Projection> {
    let dim = rows.first()?.1.len();
    let usable: Vec<&(i64, Vec<f64>)> = rows.iter().filter(|(_, v)| v.len() == dim).collect();
    if usable.len() < 2 {
        return None;
    }

    let mut mean = vec![0.0; dim];
    for (_, v) in &usable {
        for (m, x) in mean.iter_mut().zip(v) {
            *m += x;
        }
    }
    mean.iter_mut().for_each(|m| *m /= usable.len() as f64);
    let centred: Vec<Vec<f64>> = usable
        .iter()
        .map(|(_, v)| v.iter().zip(&mean).map(|(x, m)| x - m).collect())
        .collect();

    let axes = principal_axes(&centred);
    if axes.is_empty() {
        return None;
    }
    let coords: Vec<[f64; 3]> = centred
        .iter()
        .map(|row| {
            let mut c = [0.0; 3];
            for (slot, axis) in c.iter_mut().zip(&axes) {
                *slot = dot(row, axis);
            }
            c
        })
        .collect();

    let extent = coords
        .iter()
        .map(|[x, y, z]| (x * x + y * y + z * z).sqrt())
        .fold(0.0_f64, f64::max);
    let scale = if extent > 1e-12 {
        spiral_radius(usable.len()) / extent
    } else {
        0.0
    };

    let mut projection = Projection::default();
    for ((id, _), [x, y, z]) in usable.iter().zip(coords) {
        let position = Vec3::new(x * scale, y * scale, z * scale).rounded(3);
        projection.insert(GraphId::entity(*id).to_string(), position);
    }
    Some(projection)
}

/// [`ProjectionOracle`] reading `entity_embeddings` from a [`Store`].
pub struct EmbeddingProjection<'a> {
    store: &'a Store,
}

impl<'a> EmbeddingProjection<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    fn load(&self) -> Result<Vec<(i64, Vec<f64>)>> {
        let caps = self.store.capabilities();
        if !caps.has_table("entity_embeddings") {
            return Ok(Vec::new());
        }
        if !caps.has_column("entity_embeddings", "entity_id") || !caps.has_column("entity_embeddings", "embedding") {
            return Err(StoreError::InvalidData(
                "entity_embeddings lacks entity_id/embedding columns".to_string(),
            ));
        }
        let sql = if caps.has_soft_delete("entities") {
            "SELECT e.entity_id, e.embedding FROM entity_embeddings e \
             JOIN entities n ON n.id = e.entity_id WHERE n.deleted_at IS NULL ORDER BY e.entity_id"
        } else {
            "SELECT e.entity_id, e.embedding FROM entity_embeddings e \
             JOIN entities n ON n.id = e.entity_id ORDER BY e.entity_id"
        };
        let mut stmt = self.store.conn().prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        let mut skipped = 0usize;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            match decode_embedding(row.get_ref(1)?) {
                Some(vector) => out.push((id, vector)),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::debug!(skipped, "skipped undecodable embeddings");
        }
        Ok(out)
    }
}

impl ProjectionOracle for EmbeddingProjection<'_> {
    fn project(&self) -> std::result::Result<Option<Projection>, String> {
        let rows = self.load().map_err(|e| e.to_string())?;
        Ok(project_embeddings(&rows))
    }
}
