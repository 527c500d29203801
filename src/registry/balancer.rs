//! Selección del nodo menos cargado a partir de la telemetría.
//!
//! Funciones puras: mismo input, mismo resultado.

use crate::model::NodeStats;

/// Un nodo elegible, con su región y la última telemetría conocida
#[derive(Debug, Clone)]
pub struct Candidate<'a, T> {
    pub node: T,
    pub region: Option<&'a str>,
    pub stats: Option<&'a NodeStats>,
}

/// Penalización de un nodo; menor es mejor.
///
/// Sin telemetría el nodo queda último.
pub fn penalty(stats: Option<&NodeStats>) -> f64 {
    let Some(stats) = stats else {
        return f64::INFINITY;
    };

    let cores = f64::from(stats.cpu.cores.max(1));
    let cpu = 1.05_f64.powf(100.0 * stats.cpu.system_load / cores * 10.0 - 10.0);

    let deficit = stats.frame_deficit();
    let frames = if deficit > 0 {
        let factor = 1.03_f64.powf(500.0 * (deficit as f64 / 3000.0));
        (factor * 600.0 - 600.0) + 2.0 * (factor * 300.0 - 300.0)
    } else {
        0.0
    };

    f64::from(stats.playing_players) + cpu + frames
}

/// Elige un nodo. Prefiere la región pedida si algún candidato la tiene;
/// entre varios gana la menor penalización y los empates se resuelven por
/// orden de entrada.
pub fn select<T>(candidates: Vec<Candidate<'_, T>>, region: Option<&str>) -> Option<T> {
    if candidates.len() <= 1 {
        return candidates.into_iter().next().map(|candidate| candidate.node);
    }

    let mut pool = candidates;
    if let Some(region) = region {
        if pool.iter().any(|candidate| in_region(candidate, region)) {
            pool.retain(|candidate| in_region(candidate, region));
        }
    }

    if pool.len() == 1 {
        return pool.pop().map(|candidate| candidate.node);
    }

    let mut best: Option<(f64, T)> = None;
    for candidate in pool {
        let score = penalty(candidate.stats);
        match &best {
            // Estrictamente menor: el primero gana los empates
            Some((best_score, _)) if score >= *best_score => {}
            _ => best = Some((score, candidate.node)),
        }
    }

    best.map(|(_, node)| node)
}

fn in_region<T>(candidate: &Candidate<'_, T>, region: &str) -> bool {
    candidate
        .region
        .is_some_and(|candidate_region| candidate_region.eq_ignore_ascii_case(region))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cpu, FrameStats, Memory};
    use pretty_assertions::assert_eq;

    fn stats(playing_players: u32) -> NodeStats {
        NodeStats {
            players: playing_players,
            playing_players,
            uptime: 0,
            memory: Memory {
                free: 0,
                used: 0,
                allocated: 0,
                reservable: 0,
            },
            cpu: Cpu {
                cores: 4,
                system_load: 0.0,
                lavalink_load: 0.0,
            },
            frame_stats: None,
        }
    }

    fn candidate<'a>(
        node: &'static str,
        region: Option<&'a str>,
        stats: Option<&'a NodeStats>,
    ) -> Candidate<'a, &'static str> {
        Candidate { node, region, stats }
    }

    #[test]
    fn test_fewer_playing_players_wins() {
        let a = stats(2);
        let b = stats(10);

        for _ in 0..3 {
            let chosen = select(
                vec![candidate("A", None, Some(&a)), candidate("B", None, Some(&b))],
                None,
            );
            assert_eq!(chosen, Some("A"));
        }
    }

    #[test]
    fn test_region_preference_and_fallback() {
        let busy = stats(50);
        let idle = stats(0);

        let chosen = select(
            vec![
                candidate("eu", Some("eu"), Some(&idle)),
                candidate("us", Some("us"), Some(&busy)),
            ],
            Some("us"),
        );
        assert_eq!(chosen, Some("us"));

        // Ninguno en la región: se ignora la preferencia
        let chosen = select(
            vec![
                candidate("eu", Some("eu"), Some(&busy)),
                candidate("asia", Some("asia"), Some(&idle)),
            ],
            Some("us"),
        );
        assert_eq!(chosen, Some("asia"));
    }

    #[test]
    fn test_ties_keep_input_order() {
        let same = stats(3);
        let chosen = select(
            vec![
                candidate("first", None, Some(&same)),
                candidate("second", None, Some(&same)),
            ],
            None,
        );
        assert_eq!(chosen, Some("first"));
    }

    #[test]
    fn test_missing_stats_ranks_last() {
        let loaded = stats(500);
        let chosen = select(
            vec![candidate("blind", None, None), candidate("loaded", None, Some(&loaded))],
            None,
        );
        assert_eq!(chosen, Some("loaded"));
    }

    #[test]
    fn test_trivial_inputs() {
        assert_eq!(select::<&str>(Vec::new(), None), None);
        assert_eq!(select(vec![candidate("only", Some("eu"), None)], Some("us")), Some("only"));
    }

    #[test]
    fn test_frame_deficit_penalized() {
        let healthy = stats(0);
        let mut starving = stats(0);
        starving.frame_stats = Some(FrameStats {
            sent: 2000,
            nulled: 500,
            deficit: 1000,
        });

        assert!(penalty(Some(&starving)) > penalty(Some(&healthy)));
        assert_eq!(penalty(None), f64::INFINITY);
    }
}
