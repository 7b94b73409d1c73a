use pbx_core::RngHandle;
use proptest::prelude::*;

use pbx_mcmc::masking::SteppingRanks;
use pbx_mcmc::resample::component_range;
use pbx_mcmc::stepping::repeats_per_worker;

proptest! {
    #[test]
    fn component_ranges_tile_the_active_components(count in 0usize..40, workers in 1usize..9) {
        let mut next = 0;
        let mut sizes = Vec::new();
        for rank in 1..=workers {
            let range = component_range(count, workers, rank);
            prop_assert_eq!(range.start, next);
            next = range.end;
            sizes.push(range.len());
        }
        prop_assert_eq!(next, count);
        let (min, max) = (sizes.iter().min().unwrap(), sizes.iter().max().unwrap());
        prop_assert!(max - min <= 1);
    }

    #[test]
    fn forwarded_repeats_cover_the_request(repeats in 0usize..500, workers in 1usize..17) {
        let per_worker = repeats_per_worker(repeats, workers);
        prop_assert!(per_worker * workers >= repeats);
        prop_assert!(per_worker * workers < repeats + workers);
    }

    #[test]
    fn stepping_ranks_are_permutations(sites in 1usize..30, taxa in 1usize..6, seed in any::<u64>()) {
        let mut rng = RngHandle::from_seed(seed);
        let ranks = SteppingRanks::random(sites, taxa, &mut rng);
        let mut site_buffer = ranks.site_buffer();
        site_buffer.sort_unstable();
        prop_assert_eq!(site_buffer, (0..sites as i64).collect::<Vec<_>>());
        let mut cell_buffer = ranks.cell_buffer();
        cell_buffer.sort_unstable();
        prop_assert_eq!(cell_buffer, (0..(sites * taxa) as i64).collect::<Vec<_>>());
        let rebuilt = SteppingRanks::from_buffers(&ranks.site_buffer(), &ranks.cell_buffer()).unwrap();
        prop_assert_eq!(rebuilt, ranks);
    }
}

#[test]
fn four_components_over_three_workers() {
    let sizes: Vec<usize> = (1..=3).map(|rank| component_range(4, 3, rank).len()).collect();
    assert_eq!(sizes, vec![2, 1, 1]);
    assert!(component_range(4, 3, 0).is_empty());
}

#[test]
fn rank_buffers_outside_the_range_are_rejected() {
    let err = SteppingRanks::from_buffers(&[0, 5], &[0, 1, 2, 3]).unwrap_err();
    assert_eq!(err.info().code, "rank-range");
}

#[test]
fn repeated_ranks_are_rejected() {
    let err = SteppingRanks::from_buffers(&[0, 1, 2], &[0, 2, 2, 3]).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.info().code, "rank-duplicate");
    assert_eq!(err.info().context.get("position").map(String::as_str), Some("2"));

    let err = SteppingRanks::from_buffers(&[1, 1], &[0, 1]).unwrap_err();
    assert_eq!(err.info().code, "rank-duplicate");
}
