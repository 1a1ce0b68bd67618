//! GA Variable Filter (C5): evolves variable-selection *preferences*, not
//! solutions, to prune the CP search space before C6 builds the model
//! (spec §4.5). On any internal failure or timeout, returns the full
//! domain via the documented fallback rather than propagating an error --
//! matching the `FilterFailure` recovery policy of spec §7.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{info, warn};
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::domain::{locked_u_keys, locked_y_keys, UKey, YKey};
use crate::model::{ExamId, InvigilatorId, ProblemModel, RoomId, TimeSlotId};

#[derive(Debug, Clone)]
pub struct GaFilterConfig {
    pub population_min: usize,
    pub population_max: usize,
    pub generations_min: usize,
    pub generations_max: usize,
    pub wall_clock_budget: Duration,
    pub tournament_size: usize,
    pub blend_alpha: f64,
    pub mutation_indpb: f64,
    pub mutation_sigma: f64,
    pub min_y_options_per_exam: usize,
    pub min_u_options_per_yz: usize,
}

impl Default for GaFilterConfig {
    fn default() -> Self {
        GaFilterConfig {
            population_min: 20,
            population_max: 50,
            generations_min: 10,
            generations_max: 30,
            wall_clock_budget: Duration::from_secs(90),
            tournament_size: 3,
            blend_alpha: 0.3,
            mutation_indpb: 0.1,
            mutation_sigma: 0.2,
            min_y_options_per_exam: 2,
            min_u_options_per_yz: 1,
        }
    }
}

/// Result of a completed or fallback filter pass.
pub struct FilteredDomain {
    pub viable_y: Vec<YKey>,
    pub viable_u: Vec<UKey>,
    pub mode: FilterMode,
    pub generations_run: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Ga,
    Fallback,
}

/// Indexes entities to stable positions so a flat gene vector has a fixed,
/// reproducible layout for a given problem.
struct GeneLayout {
    exam_ids: Vec<ExamId>,
    room_ids: Vec<RoomId>,
    slot_ids: Vec<TimeSlotId>,
    invigilator_ids: Vec<InvigilatorId>,
    exam_priority_offset: usize,
    room_pref_offset: usize,
    slot_pref_offset: usize,
    invig_pref_offset: usize,
    total_len: usize,
}

impl GeneLayout {
    fn new(model: &ProblemModel) -> Self {
        let mut exam_ids: Vec<_> = model.exams().keys().copied().collect();
        exam_ids.sort();
        let mut room_ids: Vec<_> = model.rooms().keys().copied().collect();
        room_ids.sort();
        let mut slot_ids: Vec<_> = model.timeslots().keys().copied().collect();
        slot_ids.sort();
        let mut invigilator_ids: Vec<_> = model.invigilators().keys().copied().collect();
        invigilator_ids.sort();

        let n_e = exam_ids.len();
        let n_r = room_ids.len();
        let n_t = slot_ids.len();
        let n_i = invigilator_ids.len();

        let exam_priority_offset = 0;
        let room_pref_offset = exam_priority_offset + n_e;
        let slot_pref_offset = room_pref_offset + n_e * n_r;
        let invig_pref_offset = slot_pref_offset + n_e * n_t;
        let total_len = invig_pref_offset + n_i;

        GeneLayout {
            exam_ids,
            room_ids,
            slot_ids,
            invigilator_ids,
            exam_priority_offset,
            room_pref_offset,
            slot_pref_offset,
            invig_pref_offset,
            total_len,
        }
    }

    fn room_pref_index(&self, exam_idx: usize, room_idx: usize) -> usize {
        self.room_pref_offset + exam_idx * self.room_ids.len() + room_idx
    }

    fn slot_pref_index(&self, exam_idx: usize, slot_idx: usize) -> usize {
        self.slot_pref_offset + exam_idx * self.slot_ids.len() + slot_idx
    }

    fn invig_pref_index(&self, inv_idx: usize) -> usize {
        self.invig_pref_offset + inv_idx
    }

    /// A gene is "constraint-critical" if it falls in the first 20% (exam
    /// priorities skew toward the front of the vector) or the middle 40%
    /// of the vector (spec §4.5). The exact split is a modeling decision
    /// recorded in DESIGN.md.
    fn is_critical(&self, idx: usize) -> bool {
        let len = self.total_len as f64;
        let first_20 = (idx as f64) < 0.2 * len;
        let middle_40 = (idx as f64) >= 0.3 * len && (idx as f64) < 0.7 * len;
        first_20 || middle_40
    }
}

#[derive(Clone)]
struct Individual {
    genes: Vec<f64>,
    age: u32,
    fitness: f64,
    critical_violations: u32,
    regular_violations: u32,
}

impl Individual {
    fn random(layout: &GeneLayout, rng: &mut ChaCha8Rng) -> Self {
        let genes = (0..layout.total_len).map(|_| rng.gen_range(0.0..1.0)).collect();
        Individual {
            genes,
            age: 0,
            fitness: 0.0,
            critical_violations: 0,
            regular_violations: 0,
        }
    }
}

/// Runs the genetic variable-selection filter, returning the pruned domain
/// and a note on how generation ended.
pub fn run(
    model: &ProblemModel,
    y_domain: &[YKey],
    u_domain: &[UKey],
    config: &GaFilterConfig,
    seed: u64,
) -> FilteredDomain {
    match run_inner(model, y_domain, u_domain, config, seed) {
        Some(result) => result,
        None => {
            warn!("GA variable filter failed internally; falling back to heuristic top-k selection");
            fallback(model, y_domain, u_domain, config)
        }
    }
}

fn run_inner(
    model: &ProblemModel,
    y_domain: &[YKey],
    u_domain: &[UKey],
    config: &GaFilterConfig,
    seed: u64,
) -> Option<FilteredDomain> {
    if y_domain.is_empty() {
        return None;
    }
    let layout = GeneLayout::new(model);
    if layout.exam_ids.is_empty() || layout.room_ids.is_empty() {
        return None;
    }

    let exam_index: HashMap<ExamId, usize> = layout
        .exam_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, i))
        .collect();
    let room_index: HashMap<RoomId, usize> = layout
        .room_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, i))
        .collect();
    let slot_index: HashMap<TimeSlotId, usize> = layout
        .slot_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, i))
        .collect();
    let inv_index: HashMap<InvigilatorId, usize> = layout
        .invigilator_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, i))
        .collect();

    let pop_size = config
        .population_min
        .max((layout.exam_ids.len() / 4).clamp(config.population_min, config.population_max));
    let max_generations = config.generations_max;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut population: Vec<Individual> = (0..pop_size)
        .map(|i| {
            // RNG keyed by individual index so parallel evaluation stays
            // deterministic regardless of thread scheduling (spec §5).
            let mut ind_rng = ChaCha8Rng::seed_from_u64(seed ^ (i as u64).wrapping_mul(0x9E37_79B9));
            Individual::random(&layout, &mut ind_rng)
        })
        .collect();

    let start = Instant::now();
    let mut usage_y: HashMap<YKey, u32> = HashMap::new();
    let mut usage_u: HashMap<UKey, u32> = HashMap::new();
    let mut generations_run = 0;

    // Independent per individual and keyed off each individual's own seed,
    // so running this across threads never changes the result (spec §5).
    population.par_iter_mut().for_each(|individual| {
        evaluate_fitness(individual, &layout, y_domain, &exam_index, &room_index, &slot_index);
    });

    for generation in 0..max_generations {
        if start.elapsed() > config.wall_clock_budget {
            info!("GA filter stopped at generation {generation}: wall-clock budget exhausted");
            break;
        }
        if generation >= config.generations_min && start.elapsed() > config.wall_clock_budget / 2 {
            // Past the minimum generation count and more than halfway
            // through budget: stop early if fitness has plateaued.
            let best = population.iter().map(|i| i.fitness).fold(f64::MIN, f64::max);
            let avg = population.iter().map(|i| i.fitness).sum::<f64>() / population.len() as f64;
            if (best - avg).abs() < 1e-6 {
                break;
            }
        }

        track_usage(
            &population,
            &layout,
            y_domain,
            u_domain,
            &exam_index,
            &room_index,
            &slot_index,
            &inv_index,
            &mut usage_y,
            &mut usage_u,
        );

        let mut next_gen = Vec::with_capacity(population.len());
        while next_gen.len() < population.len() {
            let parent_a = tournament_select(&population, config.tournament_size, &mut rng);
            let parent_b = tournament_select(&population, config.tournament_size, &mut rng);
            let mut child = blend_crossover(parent_a, parent_b, &layout, config, &mut rng);
            gaussian_mutate(&mut child, &layout, config, &mut rng);
            child.age = parent_a.age.max(parent_b.age) + 1;
            evaluate_fitness(&mut child, &layout, y_domain, &exam_index, &room_index, &slot_index);
            next_gen.push(child);
        }
        population = next_gen;
        generations_run = generation + 1;
    }

    track_usage(
        &population,
        &layout,
        y_domain,
        u_domain,
        &exam_index,
        &room_index,
        &slot_index,
        &inv_index,
        &mut usage_y,
        &mut usage_u,
    );

    let y_threshold = percentile(&usage_y.values().copied().collect::<Vec<_>>(), 30.0);
    let u_threshold = percentile(&usage_u.values().copied().collect::<Vec<_>>(), 50.0);

    let locked_y = locked_y_keys(model);
    let locked_u = locked_u_keys(model);

    let mut viable_y: Vec<YKey> = y_domain
        .iter()
        .copied()
        .filter(|k| locked_y.contains(k) || usage_y.get(k).copied().unwrap_or(0) >= y_threshold)
        .collect();
    ensure_min_coverage_y(&mut viable_y, y_domain, &usage_y, &exam_index, config);

    let viable_y_set: std::collections::HashSet<YKey> = viable_y.iter().copied().collect();
    let mut viable_u: Vec<UKey> = u_domain
        .iter()
        .copied()
        .filter(|k| viable_y_set.contains(&(k.1, k.2, k.3)))
        .filter(|k| locked_u.contains(k) || usage_u.get(k).copied().unwrap_or(0) >= u_threshold)
        .collect();
    ensure_min_coverage_u(&mut viable_u, u_domain, &viable_y_set, config);

    info!(
        "GA filter reduced Y domain {} -> {} ({:.0}% kept), U domain {} -> {} ({:.0}% kept) over {generations_run} generations",
        y_domain.len(),
        viable_y.len(),
        100.0 * viable_y.len() as f64 / y_domain.len().max(1) as f64,
        u_domain.len(),
        viable_u.len(),
        100.0 * viable_u.len() as f64 / u_domain.len().max(1) as f64,
    );

    Some(FilteredDomain {
        viable_y,
        viable_u,
        mode: FilterMode::Ga,
        generations_run,
    })
}

fn evaluate_fitness(
    individual: &mut Individual,
    layout: &GeneLayout,
    y_domain: &[YKey],
    exam_index: &HashMap<ExamId, usize>,
    room_index: &HashMap<RoomId, usize>,
    slot_index: &HashMap<TimeSlotId, usize>,
) {
    // Quality proxy: how much preference mass the individual places on
    // variables that are actually in the feasible domain (a chromosome
    // that prefers infeasible combinations is a poor variable selector).
    let mut quality = 0.0;
    let mut critical_violations = 0u32;
    for &(exam_id, room_id, slot_id) in y_domain {
        let (Some(&e), Some(&r), Some(&s)) = (
            exam_index.get(&exam_id),
            room_index.get(&room_id),
            slot_index.get(&slot_id),
        ) else {
            continue;
        };
        let room_pref = individual.genes[layout.room_pref_index(e, r)];
        let slot_pref = individual.genes[layout.slot_pref_index(e, s)];
        let exam_priority = individual.genes[layout.exam_priority_offset + e];
        quality += room_pref * slot_pref * (0.5 + 0.5 * exam_priority);
    }
    quality /= y_domain.len().max(1) as f64;

    // Feasibility proxy: exams whose every room/slot preference is near
    // zero would be pruned to nothing downstream -- that is a critical
    // violation of minimum coverage and is penalized heavily.
    for e in 0..layout.exam_ids.len() {
        let has_room_pref = (0..layout.room_ids.len())
            .any(|r| individual.genes[layout.room_pref_index(e, r)] > 0.05);
        if !has_room_pref {
            critical_violations += 1;
        }
    }

    let diversity = individual.genes.iter().map(|g| (g - 0.5).abs()).sum::<f64>()
        / individual.genes.len().max(1) as f64;
    let age_penalty = (individual.age as f64) * 0.01;

    let components = FitnessWeights::default();
    individual.critical_violations = critical_violations;
    individual.regular_violations = 0;
    individual.fitness = components.quality * quality + components.diversity * diversity
        - components.age * age_penalty
        - (critical_violations as f64) * 0.2;
}

struct FitnessWeights {
    quality: f64,
    diversity: f64,
    age: f64,
}

impl Default for FitnessWeights {
    fn default() -> Self {
        // Mirrors the weight table in the prototype's
        // `FitnessComponents.total_fitness` (quality-dominant, small
        // diversity/age terms); speed/search-hint/constraint-priority
        // terms collapse into the quality proxy above since this filter
        // never invokes the real CP solver mid-evolution.
        FitnessWeights {
            quality: 0.7,
            diversity: 0.1,
            age: 0.05,
        }
    }
}

fn tournament_select<'a>(
    population: &'a [Individual],
    k: usize,
    rng: &mut ChaCha8Rng,
) -> &'a Individual {
    let mut best: Option<&Individual> = None;
    let mut best_score = f64::MIN;
    for _ in 0..k.max(1) {
        let idx = rng.gen_range(0..population.len());
        let candidate = &population[idx];
        let critical_bonus = if candidate.critical_violations == 0 {
            1.0
        } else {
            -0.3 * candidate.critical_violations as f64
        };
        let regular_penalty = 0.05 * candidate.regular_violations as f64;
        let age_penalty = 0.01 * candidate.age as f64;
        let score = candidate.fitness + critical_bonus - regular_penalty - age_penalty;
        if score > best_score {
            best_score = score;
            best = Some(candidate);
        }
    }
    best.unwrap_or(&population[0])
}

fn blend_crossover(
    a: &Individual,
    b: &Individual,
    layout: &GeneLayout,
    config: &GaFilterConfig,
    rng: &mut ChaCha8Rng,
) -> Individual {
    let mut genes = Vec::with_capacity(layout.total_len);
    for idx in 0..layout.total_len {
        let critical = layout.is_critical(idx);
        if critical && rng.gen_bool(0.3) {
            // Whole-gene preservation from a single parent in critical segments.
            genes.push(if rng.gen_bool(0.5) { a.genes[idx] } else { b.genes[idx] });
            continue;
        }
        let alpha = if critical {
            config.blend_alpha / 2.0
        } else {
            config.blend_alpha
        };
        let gamma: f64 = rng.gen_range(-alpha..=1.0 + alpha);
        let value = a.genes[idx] * gamma + b.genes[idx] * (1.0 - gamma);
        genes.push(value.clamp(0.0, 1.0));
    }
    Individual {
        genes,
        age: 0,
        fitness: 0.0,
        critical_violations: 0,
        regular_violations: 0,
    }
}

fn gaussian_mutate(
    individual: &mut Individual,
    layout: &GeneLayout,
    config: &GaFilterConfig,
    rng: &mut ChaCha8Rng,
) {
    let violation_boost = 1.0 + 0.1 * individual.critical_violations as f64;
    let age_boost = 1.0 + 0.02 * individual.age as f64;
    for idx in 0..layout.total_len {
        if !rng.gen_bool(config.mutation_indpb) {
            continue;
        }
        let critical = layout.is_critical(idx);
        let sigma = if critical {
            config.mutation_sigma / 2.0
        } else {
            config.mutation_sigma
        } * violation_boost
            * age_boost;
        let noise = sample_gaussian(rng) * sigma;
        individual.genes[idx] = (individual.genes[idx] + noise).clamp(0.0, 1.0);
    }
}

/// Box-Muller transform; `rand_distr` is not in the dependency set, so a
/// minimal standard-normal sampler is used directly.
fn sample_gaussian(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.gen_range(1e-12..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[allow(clippy::too_many_arguments)]
fn track_usage(
    population: &[Individual],
    layout: &GeneLayout,
    y_domain: &[YKey],
    u_domain: &[UKey],
    exam_index: &HashMap<ExamId, usize>,
    room_index: &HashMap<RoomId, usize>,
    slot_index: &HashMap<TimeSlotId, usize>,
    inv_index: &HashMap<InvigilatorId, usize>,
    usage_y: &mut HashMap<YKey, u32>,
    usage_u: &mut HashMap<UKey, u32>,
) {
    const SELECTION_THRESHOLD: f64 = 0.5;
    for individual in population {
        for &key @ (exam_id, room_id, slot_id) in y_domain {
            let (Some(&e), Some(&r), Some(&s)) = (
                exam_index.get(&exam_id),
                room_index.get(&room_id),
                slot_index.get(&slot_id),
            ) else {
                continue;
            };
            let score = individual.genes[layout.room_pref_index(e, r)]
                * individual.genes[layout.slot_pref_index(e, s)];
            if score >= SELECTION_THRESHOLD {
                *usage_y.entry(key).or_insert(0) += 1;
            }
        }
        for &key @ (inv_id, _, _, _) in u_domain {
            let Some(&i) = inv_index.get(&inv_id) else {
                continue;
            };
            if individual.genes[layout.invig_pref_index(i)] >= SELECTION_THRESHOLD {
                *usage_u.entry(key).or_insert(0) += 1;
            }
        }
    }
}

fn percentile(values: &[u32], pct: f64) -> u32 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((pct / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn ensure_min_coverage_y(
    viable: &mut Vec<YKey>,
    full_domain: &[YKey],
    usage: &HashMap<YKey, u32>,
    exam_index: &HashMap<ExamId, usize>,
    config: &GaFilterConfig,
) {
    let mut per_exam: HashMap<ExamId, Vec<YKey>> = HashMap::new();
    for &k in viable.iter() {
        per_exam.entry(k.0).or_default().push(k);
    }
    let mut candidates_by_exam: HashMap<ExamId, Vec<YKey>> = HashMap::new();
    for &k in full_domain {
        candidates_by_exam.entry(k.0).or_default().push(k);
    }

    for (exam_id, candidates) in candidates_by_exam.iter_mut() {
        let _ = exam_index;
        let have = per_exam.get(exam_id).map(|v| v.len()).unwrap_or(0);
        if have >= config.min_y_options_per_exam {
            continue;
        }
        candidates.sort_by_key(|k| std::cmp::Reverse(usage.get(k).copied().unwrap_or(0)));
        for &candidate in candidates.iter() {
            if per_exam.get(exam_id).map(|v| v.len()).unwrap_or(0) >= config.min_y_options_per_exam {
                break;
            }
            if !per_exam.get(exam_id).map(|v| v.contains(&candidate)).unwrap_or(false) {
                per_exam.entry(*exam_id).or_default().push(candidate);
                viable.push(candidate);
            }
        }
    }
}

fn ensure_min_coverage_u(
    viable: &mut Vec<UKey>,
    full_domain: &[UKey],
    viable_y_set: &std::collections::HashSet<YKey>,
    config: &GaFilterConfig,
) {
    let mut per_yz: HashMap<YKey, Vec<UKey>> = HashMap::new();
    for &k in viable.iter() {
        per_yz.entry((k.1, k.2, k.3)).or_default().push(k);
    }
    for &yz in viable_y_set {
        let entry = per_yz.entry(yz).or_default();
        if entry.len() >= config.min_u_options_per_yz {
            continue;
        }
        for &candidate in full_domain.iter().filter(|k| (k.1, k.2, k.3) == yz) {
            if entry.len() >= config.min_u_options_per_yz {
                break;
            }
            if !entry.contains(&candidate) {
                entry.push(candidate);
                viable.push(candidate);
            }
        }
    }
}

/// Top-k heuristic fallback (spec §4.5): used on any internal GA failure
/// or when the recursion/time budget is exhausted. Selects by a simple
/// combined preference score rather than running evolution at all.
fn fallback(
    model: &ProblemModel,
    y_domain: &[YKey],
    u_domain: &[UKey],
    config: &GaFilterConfig,
) -> FilteredDomain {
    let locked_y = locked_y_keys(model);
    let locked_u = locked_u_keys(model);

    let mut by_exam: HashMap<ExamId, Vec<YKey>> = HashMap::new();
    for &k in y_domain {
        by_exam.entry(k.0).or_default().push(k);
    }
    let mut viable_y = Vec::new();
    for (_exam_id, mut candidates) in by_exam {
        candidates.sort_by_key(|k| {
            let room = &model.rooms()[&k.1];
            std::cmp::Reverse(room.exam_capacity)
        });
        let keep = candidates.len().min(config.min_y_options_per_exam.max(
            (candidates.len() as f64 * 0.5).ceil() as usize,
        ));
        for (idx, key) in candidates.into_iter().enumerate() {
            if idx < keep || locked_y.contains(&key) {
                viable_y.push(key);
            }
        }
    }
    let viable_y_set: std::collections::HashSet<YKey> = viable_y.iter().copied().collect();

    let mut by_yz: HashMap<YKey, Vec<UKey>> = HashMap::new();
    for &k in u_domain {
        if viable_y_set.contains(&(k.1, k.2, k.3)) {
            by_yz.entry((k.1, k.2, k.3)).or_default().push(k);
        }
    }
    let mut viable_u = Vec::new();
    for (_yz, mut candidates) in by_yz {
        candidates.sort_by_key(|k| {
            let inv = &model.invigilators()[&k.0];
            std::cmp::Reverse(inv.max_concurrent_exams)
        });
        let keep = candidates.len().min(config.min_u_options_per_yz.max(1));
        for (idx, key) in candidates.into_iter().enumerate() {
            if idx < keep || locked_u.contains(&key) {
                viable_u.push(key);
            }
        }
    }

    FilteredDomain {
        viable_y,
        viable_u,
        mode: FilterMode::Fallback,
        generations_run: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_empty_is_zero() {
        assert_eq!(percentile(&[], 30.0), 0);
    }

    #[test]
    fn percentile_picks_expected_rank() {
        let values = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert_eq!(percentile(&values, 50.0), 6);
    }
}
