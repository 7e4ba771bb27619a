// rpgo_core/src/io/g2o.rs

//! The g2o text format: one vertex or edge per line, ids are raw key
//! encodings, information matrices are stored as their upper triangle.
//!
//! Spatial information matrices are written translation-first, as g2o
//! expects; internally the tangent space is rotation-first.

use nalgebra::{DMatrix, Quaternion, Translation3, UnitQuaternion, Vector2};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::IoError;
use crate::factors::{Factor, FactorGraph, NoiseModel};
use crate::types::Key;
use crate::values::{Pose2, Pose3, Value, Values};

const VERTEX_SE2: &str = "VERTEX_SE2";
const VERTEX_SE3: &str = "VERTEX_SE3:QUAT";
const EDGE_SE2: &str = "EDGE_SE2";
const EDGE_SE3: &str = "EDGE_SE3:QUAT";

/// Maps between g2o (translation-first) and internal (rotation-first) 6-DoF order.
const SE3_PERMUTATION: [usize; 6] = [3, 4, 5, 0, 1, 2];

/// Writes every value as a vertex and every between factor as an edge.
/// Priors have no g2o representation and are skipped. Fails before touching
/// `path` if some key cannot be encoded as a g2o id.
pub fn write_g2o(path: &Path, graph: &FactorGraph, values: &Values) -> Result<(), IoError> {
    let unencodable = values
        .iter()
        .map(|(key, _)| *key)
        .chain(graph.iter().flat_map(|factor| factor.keys()))
        .find(|key| !key.is_raw_encodable());
    if let Some(key) = unencodable {
        return Err(IoError::UnencodableKey {
            path: path.to_path_buf(),
            key,
        });
    }
    let file = File::create(path).map_err(|e| IoError::file(path, e))?;
    let mut out = BufWriter::new(file);
    write_contents(&mut out, graph, values).map_err(|e| IoError::file(path, e))
}

fn write_contents(out: &mut impl Write, graph: &FactorGraph, values: &Values) -> std::io::Result<()> {
    for (key, value) in values.iter() {
        match value {
            Value::Pose2(p) => writeln!(
                out,
                "{} {} {} {} {}",
                VERTEX_SE2,
                key.raw(),
                p.translation.x,
                p.translation.y,
                p.rotation.angle()
            )?,
            Value::Pose3(p) => {
                let t = p.translation.vector;
                let q = p.rotation.coords;
                writeln!(
                    out,
                    "{} {} {} {} {} {} {} {} {}",
                    VERTEX_SE3,
                    key.raw(),
                    t.x,
                    t.y,
                    t.z,
                    q.x,
                    q.y,
                    q.z,
                    q.w
                )?
            }
        }
    }

    for factor in graph {
        let Factor::Between {
            key1,
            key2,
            measured,
            noise,
        } = factor
        else {
            continue;
        };
        let (tag, fields, information) = match measured {
            Value::Pose2(p) => (
                EDGE_SE2,
                vec![p.translation.x, p.translation.y, p.rotation.angle()],
                noise.information().clone(),
            ),
            Value::Pose3(p) => {
                let t = p.translation.vector;
                let q = p.rotation.coords;
                (
                    EDGE_SE3,
                    vec![t.x, t.y, t.z, q.x, q.y, q.z, q.w],
                    permute(noise.information(), &SE3_PERMUTATION),
                )
            }
        };
        write!(out, "{} {} {}", tag, key1.raw(), key2.raw())?;
        for f in fields {
            write!(out, " {}", f)?;
        }
        for i in 0..information.nrows() {
            for j in i..information.ncols() {
                write!(out, " {}", information[(i, j)])?;
            }
        }
        writeln!(out)?;
    }
    out.flush()
}

/// Reads vertices and edges back. Ids without a character byte are assigned
/// `default_prefix`. Unknown tags are skipped.
pub fn read_g2o(path: &Path, default_prefix: char) -> Result<(FactorGraph, Values), IoError> {
    let file = File::open(path).map_err(|e| IoError::file(path, e))?;
    let mut graph = FactorGraph::new();
    let mut values = Values::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| IoError::file(path, e))?;
        let malformed = |reason: String| IoError::Malformed {
            path: path.to_path_buf(),
            line: idx + 1,
            reason,
        };
        let mut tokens = line.split_whitespace();
        let Some(tag) = tokens.next() else {
            continue;
        };
        let numbers: Vec<&str> = tokens.collect();
        match tag {
            VERTEX_SE2 => {
                let (id, f) = parse_vertex(&numbers, 3).map_err(malformed)?;
                values.insert(
                    Key::from_raw(id, default_prefix),
                    Pose2::new(Vector2::new(f[0], f[1]), f[2]),
                );
            }
            VERTEX_SE3 => {
                let (id, f) = parse_vertex(&numbers, 7).map_err(malformed)?;
                values.insert(Key::from_raw(id, default_prefix), pose3(&f));
            }
            EDGE_SE2 => {
                let (k1, k2, f, information) = parse_edge(&numbers, 3, 3).map_err(malformed)?;
                let noise = NoiseModel::from_information(information)
                    .ok_or_else(|| malformed("singular information matrix".into()))?;
                graph.push(Factor::between(
                    Key::from_raw(k1, default_prefix),
                    Key::from_raw(k2, default_prefix),
                    Pose2::new(Vector2::new(f[0], f[1]), f[2]),
                    noise,
                ));
            }
            EDGE_SE3 => {
                let (k1, k2, f, information) = parse_edge(&numbers, 7, 6).map_err(malformed)?;
                let noise = NoiseModel::from_information(permute(&information, &SE3_PERMUTATION))
                    .ok_or_else(|| malformed("singular information matrix".into()))?;
                graph.push(Factor::between(
                    Key::from_raw(k1, default_prefix),
                    Key::from_raw(k2, default_prefix),
                    pose3(&f),
                    noise,
                ));
            }
            _ => {}
        }
    }
    Ok((graph, values))
}

fn pose3(f: &[f64]) -> Pose3 {
    let rotation = UnitQuaternion::from_quaternion(Quaternion::new(f[6], f[3], f[4], f[5]));
    Pose3::from_parts(Translation3::new(f[0], f[1], f[2]), rotation)
}

/// `out[i][j] = m[perm[i]][perm[j]]`; `SE3_PERMUTATION` is its own inverse.
fn permute(m: &DMatrix<f64>, perm: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| m[(perm[i], perm[j])])
}

fn parse_numbers(tokens: &[&str]) -> Result<Vec<f64>, String> {
    tokens
        .iter()
        .map(|t| t.parse::<f64>().map_err(|_| format!("invalid number '{}'", t)))
        .collect()
}

fn parse_id(token: Option<&&str>) -> Result<u64, String> {
    let token = token.ok_or_else(|| "missing id".to_string())?;
    token
        .parse::<u64>()
        .map_err(|_| format!("invalid id '{}'", token))
}

fn parse_vertex(tokens: &[&str], fields: usize) -> Result<(u64, Vec<f64>), String> {
    if tokens.len() != 1 + fields {
        return Err(format!(
            "expected {} fields after the id, found {}",
            fields,
            tokens.len().saturating_sub(1)
        ));
    }
    Ok((parse_id(tokens.first())?, parse_numbers(&tokens[1..])?))
}

fn parse_edge(
    tokens: &[&str],
    fields: usize,
    dim: usize,
) -> Result<(u64, u64, Vec<f64>, DMatrix<f64>), String> {
    let upper = dim * (dim + 1) / 2;
    if tokens.len() != 2 + fields + upper {
        return Err(format!(
            "expected {} values, found {}",
            2 + fields + upper,
            tokens.len()
        ));
    }
    let k1 = parse_id(tokens.first())?;
    let k2 = parse_id(tokens.get(1))?;
    let numbers = parse_numbers(&tokens[2..])?;
    let (measurement, triangle) = numbers.split_at(fields);

    let mut information = DMatrix::zeros(dim, dim);
    let mut entries = triangle.iter();
    for i in 0..dim {
        for j in i..dim {
            let v = *entries.next().ok_or_else(|| "truncated information".to_string())?;
            information[(i, j)] = v;
            information[(j, i)] = v;
        }
    }
    Ok((k1, k2, measurement.to_vec(), information))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;
    use std::io::Write as _;

    #[test]
    fn round_trips_planar_graph() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.g2o");

        let k0 = Key::new('a', 0);
        let k1 = Key::new('a', 1);
        let mut values = Values::new();
        values.insert(k0, Pose2::identity());
        values.insert(k1, Pose2::new(Vector2::new(1.0, 0.5), 0.25));
        let mut graph = FactorGraph::new();
        graph.push(Factor::prior(k0, Pose2::identity(), NoiseModel::isotropic(3, 0.1)));
        graph.push(Factor::between(
            k0,
            k1,
            Pose2::new(Vector2::new(1.0, 0.5), 0.25),
            NoiseModel::diagonal(&[0.1, 0.2, 0.05]),
        ));

        write_g2o(&path, &graph, &values).unwrap();
        let (read_graph, read_values) = read_g2o(&path, 'z').unwrap();

        // The prior is not representable.
        assert_eq!(read_graph.len(), 1);
        assert_eq!(read_values.len(), 2);
        let edge = read_graph.get(0).unwrap();
        assert_eq!(edge.keys(), vec![k0, k1]);
        assert_abs_diff_eq!(
            edge.noise().information(),
            graph.get(1).unwrap().noise().information(),
            epsilon = 1e-6
        );
        let p1 = read_values.pose::<Pose2>(&k1).unwrap();
        assert_abs_diff_eq!(p1.rotation.angle(), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn spatial_information_is_stored_translation_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.g2o");
        let noise = NoiseModel::diagonal(&[0.01, 0.01, 0.01, 1.0, 1.0, 1.0]);
        let graph: FactorGraph = [Factor::between(
            Key::new('a', 0),
            Key::new('a', 1),
            Pose3::new(Vector3::new(1.0, 2.0, 3.0), Vector3::new(0.1, 0.0, 0.0)),
            noise.clone(),
        )]
        .into_iter()
        .collect();
        write_g2o(&path, &graph, &Values::new()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let tokens: Vec<f64> = text
            .split_whitespace()
            .skip(3)
            .map(|t| t.parse().unwrap())
            .collect();
        // First information entry is the translation weight (1/1²).
        assert_abs_diff_eq!(tokens[7], 1.0, epsilon = 1e-9);

        let (read_graph, _) = read_g2o(&path, 'a').unwrap();
        let edge = read_graph.get(0).unwrap();
        assert_abs_diff_eq!(edge.noise().information(), noise.information(), epsilon = 1e-6);
        let Value::Pose3(p) = edge.measured() else {
            panic!("expected a spatial edge");
        };
        assert_abs_diff_eq!(p.translation.vector, Vector3::new(1.0, 2.0, 3.0), epsilon = 1e-12);
    }

    #[test]
    fn plain_integer_ids_use_default_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.g2o");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "VERTEX_SE2 0 0 0 0").unwrap();
        writeln!(f, "VERTEX_SE2 1 1 0 0").unwrap();
        writeln!(f, "EDGE_SE2 0 1 1 0 0 100 0 0 100 0 100").unwrap();
        writeln!(f, "FIX 0").unwrap();
        drop(f);

        let (graph, values) = read_g2o(&path, 'r').unwrap();
        assert_eq!(values.len(), 2);
        assert!(values.contains(&Key::new('r', 1)));
        assert_eq!(graph.get(0).unwrap().keys(), vec![Key::new('r', 0), Key::new('r', 1)]);
    }

    #[test]
    fn keys_outside_the_id_range_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.g2o");
        for key in [Key::new('a', Key::MAX_RAW_INDEX + 1), Key::new('é', 0)] {
            let mut values = Values::new();
            values.insert(key, Pose2::identity());
            match write_g2o(&path, &FactorGraph::new(), &values) {
                Err(IoError::UnencodableKey { key: refused, .. }) => assert_eq!(refused, key),
                other => panic!("expected unencodable key, got {:?}", other),
            }
        }
        assert!(!path.exists());

        let edge: FactorGraph = [Factor::between(
            Key::new('a', 0),
            Key::new('a', u64::MAX),
            Pose2::identity(),
            NoiseModel::isotropic(3, 0.1),
        )]
        .into_iter()
        .collect();
        assert!(matches!(
            write_g2o(&path, &edge, &Values::new()),
            Err(IoError::UnencodableKey { .. })
        ));
    }

    #[test]
    fn truncated_edge_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.g2o");
        std::fs::write(&path, "VERTEX_SE2 0 0 0 0\nEDGE_SE2 0 1 1 0 0 100\n").unwrap();
        match read_g2o(&path, 'a') {
            Err(IoError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed error, got {:?}", other),
        }
    }
}
