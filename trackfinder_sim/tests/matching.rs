//! Randomised checks of truth matching and of the harness end to end.

use proptest::prelude::*;
use trackfinder_core::{AcceptedTrack, CandidateId, PipelineResult, TrackCandidate};
use trackfinder_env::{SpacePointId, Subsystem};
use trackfinder_sim::{match_event, DetectorLayout, Oracle, SimEvent};

fn event(seed: u64, particles: usize, noise: usize) -> SimEvent {
    let mut oracle = Oracle::new(seed, DetectorLayout::uniform(6));
    oracle.spawn_random(particles);
    oracle.set_noise(noise);
    oracle.generate_event()
}

/// Tracks drawn from the event's point ids, possibly mixing particles and noise.
fn tracks(ev: &SimEvent, picks: &[Vec<usize>]) -> PipelineResult {
    let tracks = picks
        .iter()
        .enumerate()
        .filter_map(|(i, pick)| {
            let mut hits: Vec<SpacePointId> = pick.iter().filter_map(|&k| ev.points.get(k).map(|p| p.id)).collect();
            hits.sort_unstable();
            hits.dedup();
            (!hits.is_empty()).then(|| AcceptedTrack::Candidate(TrackCandidate::new(CandidateId(i as u32), hits)))
        })
        .collect();
    PipelineResult {
        tracks,
        ..PipelineResult::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn property_match_counts_are_bounded(
        seed in any::<u64>(),
        particles in 0usize..6,
        noise in 0usize..3,
        picks in prop::collection::vec(prop::collection::vec(0usize..60, 1..8), 0..8),
    ) {
        let ev = event(seed, particles, noise);
        let result = tracks(&ev, &picks);
        let m = match_event(&ev, &result, &[Subsystem::Svd], 3);

        prop_assert!(m.found <= m.reconstructable);
        prop_assert!(m.reconstructable <= ev.particles.len());
        prop_assert_eq!(m.tracks, result.tracks.len());
        prop_assert!(m.fakes <= m.tracks);
        prop_assert!(m.clones + m.fakes <= m.tracks);
    }

    #[test]
    fn property_truth_tracks_are_found_once(seed in any::<u64>(), particles in 1usize..6) {
        let ev = event(seed, particles, 0);
        let picks: Vec<Vec<usize>> = ev
            .particles
            .iter()
            .map(|p| {
                ev.hits_of(p.id)
                    .iter()
                    .filter_map(|h| ev.points.iter().position(|q| q.id == h.id))
                    .collect()
            })
            .collect();
        let result = tracks(&ev, &picks);
        let m = match_event(&ev, &result, &[Subsystem::Svd], 3);

        prop_assert_eq!(m.found, m.reconstructable);
        prop_assert_eq!(m.fakes, 0);
        prop_assert_eq!(m.clones, 0);
    }
}
