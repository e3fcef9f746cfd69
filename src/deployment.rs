// src/deployment.rs
//
// Fleet support tooling: UAV relay placement via seeded k-means over
// ground-device positions, and a priority-greedy device-to-UAV scheduler
// with per-UAV capacity limits.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;

const MAX_KMEANS_ITERS: usize = 100;

/// Default number of devices one UAV relay can serve.
pub const DEFAULT_MAX_CAPACITY: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentError {
    /// Placement needs at least as many devices as UAVs.
    NotEnoughDevices { devices: usize, uavs: usize },
    /// Placement with zero UAVs is meaningless.
    NoUavs,
}

impl fmt::Display for DeploymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentError::NotEnoughDevices { devices, uavs } => {
                write!(f, "{devices} device position(s) for {uavs} uav(s)")
            }
            DeploymentError::NoUavs => write!(f, "at least one uav is required"),
        }
    }
}

impl std::error::Error for DeploymentError {}

/// A ground device with a scheduling priority and a 2-D position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DevicePoint {
    pub id: u32,
    pub priority: f64,
    pub position: (f64, f64),
}

/// A candidate UAV relay site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UavSite {
    pub id: u32,
    pub position: (f64, f64),
}

fn dist2(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    dx * dx + dy * dy
}

/// Place `num_uavs` relays over the device field with Lloyd's algorithm.
///
/// Initial centroids are `num_uavs` distinct device positions sampled from
/// `rng`; iteration stops when assignments stabilize or after a fixed cap.
/// A cluster that loses all members keeps its previous centroid.
pub fn optimize_positions(
    devices: &[(f64, f64)],
    num_uavs: usize,
    rng: &mut impl Rng,
) -> Result<Vec<(f64, f64)>, DeploymentError> {
    if num_uavs == 0 {
        return Err(DeploymentError::NoUavs);
    }
    if devices.len() < num_uavs {
        return Err(DeploymentError::NotEnoughDevices {
            devices: devices.len(),
            uavs: num_uavs,
        });
    }

    let mut centroids: Vec<(f64, f64)> = rand::seq::index::sample(rng, devices.len(), num_uavs)
        .into_iter()
        .map(|i| devices[i])
        .collect();
    let mut assignment = vec![usize::MAX; devices.len()];

    for _ in 0..MAX_KMEANS_ITERS {
        let mut changed = false;
        for (i, p) in devices.iter().enumerate() {
            let mut best = 0;
            let mut best_d = f64::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = dist2(*p, *centroid);
                if d < best_d {
                    best_d = d;
                    best = c;
                }
            }
            if assignment[i] != best {
                assignment[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        for (c, centroid) in centroids.iter_mut().enumerate() {
            let mut sum = (0.0, 0.0);
            let mut count = 0usize;
            for (i, p) in devices.iter().enumerate() {
                if assignment[i] == c {
                    sum.0 += p.0;
                    sum.1 += p.1;
                    count += 1;
                }
            }
            if count > 0 {
                *centroid = (sum.0 / count as f64, sum.1 / count as f64);
            }
        }
    }

    Ok(centroids)
}

/// Assign devices to UAVs greedily by priority.
///
/// Devices are visited in descending priority (stable on ties) and each
/// takes its nearest UAV that still has capacity. A device with no open
/// UAV stays unassigned. The returned map carries every UAV id, including
/// those that got no devices.
pub fn priority_greedy_assign(
    devices: &[DevicePoint],
    uavs: &[UavSite],
    max_capacity: usize,
) -> BTreeMap<u32, Vec<u32>> {
    let mut assignments: BTreeMap<u32, Vec<u32>> =
        uavs.iter().map(|u| (u.id, Vec::new())).collect();

    let mut order: Vec<&DevicePoint> = devices.iter().collect();
    order.sort_by(|a, b| {
        b.priority
            .partial_cmp(&a.priority)
            .unwrap_or(Ordering::Equal)
    });

    for device in order {
        let mut best: Option<(u32, f64)> = None;
        for uav in uavs {
            let load = assignments.get(&uav.id).map(|v| v.len()).unwrap_or(0);
            if load >= max_capacity {
                continue;
            }
            let d = dist2(device.position, uav.position);
            let closer = match best {
                Some((_, best_d)) => d < best_d,
                None => true,
            };
            if closer {
                best = Some((uav.id, d));
            }
        }
        if let Some((uav_id, _)) = best {
            if let Some(list) = assignments.get_mut(&uav_id) {
                list.push(device.id);
            }
        }
    }

    assignments
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn two_blobs() -> Vec<(f64, f64)> {
        vec![
            (0.0, 0.0),
            (0.5, 0.2),
            (0.1, 0.6),
            (0.4, 0.4),
            (10.0, 10.0),
            (10.3, 9.8),
            (9.7, 10.2),
            (10.1, 10.4),
        ]
    }

    #[test]
    fn kmeans_finds_the_two_blobs() {
        let mut rng = ChaCha8Rng::seed_from_u64(31);
        let mut centers = optimize_positions(&two_blobs(), 2, &mut rng).unwrap();
        centers.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

        // One center near the origin blob, one near (10, 10).
        assert!(centers[0].0 < 1.0 && centers[0].1 < 1.0);
        assert!(centers[1].0 > 9.0 && centers[1].1 > 9.0);
    }

    #[test]
    fn kmeans_is_deterministic_for_a_seed() {
        let devices = two_blobs();
        let a = optimize_positions(
            &devices,
            3,
            &mut ChaCha8Rng::seed_from_u64(7),
        )
        .unwrap();
        let b = optimize_positions(
            &devices,
            3,
            &mut ChaCha8Rng::seed_from_u64(7),
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn too_few_devices_is_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = optimize_positions(&[(0.0, 0.0)], 2, &mut rng).unwrap_err();
        assert_eq!(
            err,
            DeploymentError::NotEnoughDevices {
                devices: 1,
                uavs: 2
            }
        );
    }

    #[test]
    fn zero_uavs_is_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            optimize_positions(&[(0.0, 0.0)], 0, &mut rng),
            Err(DeploymentError::NoUavs)
        );
    }

    #[test]
    fn capacity_limits_are_respected() {
        let devices = vec![
            DevicePoint {
                id: 1,
                priority: 0.9,
                position: (0.0, 0.0),
            },
            DevicePoint {
                id: 2,
                priority: 0.8,
                position: (0.1, 0.0),
            },
            DevicePoint {
                id: 3,
                priority: 0.7,
                position: (0.2, 0.0),
            },
        ];
        let uavs = vec![UavSite {
            id: 10,
            position: (0.0, 0.0),
        }];

        let assignments = priority_greedy_assign(&devices, &uavs, 2);
        // Highest-priority two fit; the third finds no open uav.
        assert_eq!(assignments[&10], vec![1, 2]);
    }

    #[test]
    fn high_priority_takes_the_nearest_uav_first() {
        let devices = vec![
            DevicePoint {
                id: 1,
                priority: 0.2,
                position: (0.0, 0.0),
            },
            DevicePoint {
                id: 2,
                priority: 0.9,
                position: (0.1, 0.0),
            },
        ];
        let uavs = vec![
            UavSite {
                id: 10,
                position: (0.0, 0.0),
            },
            UavSite {
                id: 11,
                position: (5.0, 5.0),
            },
        ];

        // Capacity 1 forces the low-priority device to the far uav.
        let assignments = priority_greedy_assign(&devices, &uavs, 1);
        assert_eq!(assignments[&10], vec![2]);
        assert_eq!(assignments[&11], vec![1]);
    }

    #[test]
    fn every_uav_id_appears_in_the_map() {
        let uavs = vec![
            UavSite {
                id: 3,
                position: (0.0, 0.0),
            },
            UavSite {
                id: 7,
                position: (1.0, 1.0),
            },
        ];
        let assignments = priority_greedy_assign(&[], &uavs, DEFAULT_MAX_CAPACITY);
        assert_eq!(assignments.len(), 2);
        assert!(assignments[&3].is_empty());
        assert!(assignments[&7].is_empty());
    }
}
