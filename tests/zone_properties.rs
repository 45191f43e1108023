use proptest::prelude::*;
use std::f64::consts::PI;
use zone_monitor::zone::Zone;

fn polygon() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((-500.0f64..500.0, -500.0f64..500.0), 3..12)
}

/// 正多边形 (凸)
fn convex() -> impl Strategy<Value = (Vec<(f64, f64)>, (f64, f64))> {
    (3usize..16, 1.0f64..300.0, -300.0f64..300.0, -300.0f64..300.0, 0.0f64..(2.0 * PI)).prop_map(
        |(n, r, cx, cy, phase)| {
            let points = (0..n)
                .map(|i| {
                    let a = phase + 2.0 * PI * i as f64 / n as f64;
                    (cx + r * a.cos(), cy + r * a.sin())
                })
                .collect();
            (points, (cx, cy))
        },
    )
}

proptest! {
    #[test]
    fn contains_is_deterministic(points in polygon(), x in -600.0f64..600.0, y in -600.0f64..600.0) {
        let zone = Zone::new(points, 8.0);
        let first = zone.contains(x, y);
        for _ in 0..3 {
            prop_assert_eq!(zone.contains(x, y), first);
        }
    }

    #[test]
    fn far_outside_is_never_inside(points in polygon(), dx in 1.0f64..1000.0, dy in -1000.0f64..1000.0) {
        let zone = Zone::new(points, 8.0);
        let (min_x, min_y, max_x, max_y) = zone.bounds();
        prop_assert!(!zone.contains(max_x + dx, dy));
        prop_assert!(!zone.contains(min_x - dx, dy));
        prop_assert!(!zone.contains(dy, max_y + dx));
        prop_assert!(!zone.contains(dy, min_y - dx));
    }

    #[test]
    fn convex_centroid_is_inside((points, centroid) in convex()) {
        let zone = Zone::new(points, 8.0);
        prop_assert!(zone.contains(centroid.0, centroid.1));
    }
}
