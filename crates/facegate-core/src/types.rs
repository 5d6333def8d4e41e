use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Euclidean distance between two embeddings. Lower = more similar.
    ///
    /// This is the metric the comparison threshold applies to: two faces
    /// within 0.6 of each other (for L2-normalized ArcFace vectors) are
    /// treated as the same person.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// A persisted face registration: one embedding plus the registrant fields
/// captured at enrollment, scoped to an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRecord {
    pub id: String,
    pub event_id: String,
    pub name: String,
    pub school: String,
    pub email: String,
    pub embedding: Embedding,
    pub created_at: String,
}

/// A gallery record that matched the probe embedding.
///
/// Serialized straight into API responses, so field names follow the
/// camelCase wire convention.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceMatch {
    pub face_id: String,
    pub name: String,
    pub school: String,
    pub email: String,
    pub distance: f32,
}

/// Strategy for comparing a probe embedding against an event's gallery.
pub trait Matcher {
    /// Return every gallery record within `threshold` of the probe,
    /// sorted by ascending distance.
    fn matches(&self, probe: &Embedding, gallery: &[FaceRecord], threshold: f32) -> Vec<FaceMatch>;
}

/// Euclidean distance matcher.
///
/// Always traverses the whole gallery: galleries are event-sized, and a
/// full scan keeps match latency independent of where the hit sits.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn matches(&self, probe: &Embedding, gallery: &[FaceRecord], threshold: f32) -> Vec<FaceMatch> {
        let mut hits: Vec<FaceMatch> = gallery
            .iter()
            .filter_map(|record| {
                let distance = probe.euclidean_distance(&record.embedding);
                (distance <= threshold).then(|| FaceMatch {
                    face_id: record.id.clone(),
                    name: record.name.clone(),
                    school: record.school.clone(),
                    email: record.email.clone(),
                    distance,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding {
            values,
            model_version: None,
        }
    }

    fn record(id: &str, email: &str, values: Vec<f32>) -> FaceRecord {
        FaceRecord {
            id: id.into(),
            event_id: "ev1".into(),
            name: "Avery".into(),
            school: "Northside".into(),
            email: email.into(),
            embedding: emb(values),
            created_at: String::new(),
        }
    }

    #[test]
    fn euclidean_distance_identical_is_zero() {
        let a = emb(vec![0.5, 0.5, 0.0]);
        assert!(a.euclidean_distance(&a) < 1e-6);
    }

    #[test]
    fn euclidean_distance_unit_axes() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![0.0, 1.0]);
        assert!((a.euclidean_distance(&b) - 2.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn similarity_identical() {
        let a = emb(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn similarity_orthogonal() {
        let a = emb(vec![1.0, 0.0]);
        let b = emb(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn similarity_zero_vector() {
        let a = emb(vec![0.0, 0.0]);
        let b = emb(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn matcher_returns_hits_sorted_by_distance() {
        let probe = emb(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            record("far", "far@example.com", vec![0.0, 1.0, 0.0]),
            record("close", "close@example.com", vec![0.9, 0.1, 0.0]),
            record("exact", "exact@example.com", vec![1.0, 0.0, 0.0]),
        ];

        let hits = EuclideanMatcher.matches(&probe, &gallery, 0.6);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].face_id, "exact");
        assert_eq!(hits[1].face_id, "close");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[test]
    fn matcher_excludes_records_over_threshold() {
        let probe = emb(vec![1.0, 0.0]);
        let gallery = vec![record("a", "a@example.com", vec![0.0, 1.0])];
        assert!(EuclideanMatcher.matches(&probe, &gallery, 0.6).is_empty());
    }

    #[test]
    fn matcher_empty_gallery() {
        let probe = emb(vec![1.0, 0.0]);
        assert!(EuclideanMatcher.matches(&probe, &[], 0.6).is_empty());
    }

    #[test]
    fn face_match_serializes_camel_case() {
        let hit = FaceMatch {
            face_id: "f1".into(),
            name: "Avery".into(),
            school: "Northside".into(),
            email: "avery@example.com".into(),
            distance: 0.25,
        };
        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(json["faceId"], "f1");
        assert!(json.get("face_id").is_none());
    }

    #[test]
    fn matcher_hit_carries_registrant_fields() {
        let probe = emb(vec![1.0, 0.0]);
        let gallery = vec![record("f1", "avery@example.com", vec![1.0, 0.0])];
        let hits = EuclideanMatcher.matches(&probe, &gallery, 0.6);
        assert_eq!(hits[0].name, "Avery");
        assert_eq!(hits[0].school, "Northside");
        assert_eq!(hits[0].email, "avery@example.com");
    }
}
