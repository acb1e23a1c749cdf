//! Library entry point tying the stages together: preprocessing filters,
//! pre-graph construction, refinement, final assignment. The orchestration
//! layer (CLI, workflow engine) owns file discovery and model loading and
//! hands this pipeline the stores and the scorer.

use std::sync::atomic::AtomicBool;

use anyhow::Result;
use tracing::info;

use crate::clustering::pregraph::build_pregraph;
use crate::clustering::refine::{ClusterRefiner, RefineOutcome};
use crate::core::{ContigId, ContigSet};
use crate::features::coverage::detect_singletons;
use crate::features::stores::{CoverageStore, RepresentationStore};
use crate::scoring::SimilarityScorer;
use crate::utils::artifacts::{write_singletons, ArtifactWorkspace};
use crate::utils::configuration::BinningConfig;

pub struct BinningPipeline<'a> {
    config: BinningConfig,
    scorer: &'a dyn SimilarityScorer,
    coverage: &'a dyn CoverageStore,
    representations: &'a dyn RepresentationStore,
}

impl<'a> BinningPipeline<'a> {
    /// Validates the configuration once; every later stage assumes it.
    pub fn new(
        config: BinningConfig,
        scorer: &'a dyn SimilarityScorer,
        coverage: &'a dyn CoverageStore,
        representations: &'a dyn RepresentationStore,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            scorer,
            coverage,
            representations,
        })
    }

    pub fn config(&self) -> &BinningConfig {
        &self.config
    }

    /// Run preprocessing, graph construction and refinement.
    ///
    /// Contigs excluded by either filter — too short, or too low coverage
    /// prevalence — never enter the graph but reappear in the assignment,
    /// each as its own cluster.
    pub fn run(
        &self,
        contigs: &mut ContigSet,
        workspace: &ArtifactWorkspace,
        force: bool,
    ) -> Result<RefineOutcome> {
        self.run_with_cancel(contigs, workspace, force, None)
    }

    pub fn run_with_cancel(
        &self,
        contigs: &mut ContigSet,
        workspace: &ArtifactWorkspace,
        force: bool,
        cancel: Option<&AtomicBool>,
    ) -> Result<RefineOutcome> {
        info!(contigs = contigs.len(), "binning run started");
        self.config.to_json_file(&workspace.path("config.json"))?;

        let filtered = contigs.filter_by_length(self.config.min_ctg_len);
        let low_prevalence =
            detect_singletons(contigs, self.coverage, self.config.min_prevalence)?;

        // Everything excluded from the graph comes back as a singleton
        // cluster at finalization.
        let mut excluded: Vec<ContigId> = contigs
            .iter()
            .filter(|c| c.filtered)
            .map(|c| c.id.clone())
            .collect();
        excluded.extend(low_prevalence);
        excluded.sort();
        excluded.dedup();
        write_singletons(&workspace.path("singletons.txt"), &excluded)?;
        info!(
            filtered,
            excluded = excluded.len(),
            eligible = contigs.eligible().count(),
            "preprocessing done"
        );

        let mut graph = build_pregraph(
            contigs,
            self.coverage,
            self.scorer,
            &self.config,
            workspace,
            force,
        )?;

        let refiner = ClusterRefiner::new(self.scorer, self.representations, &self.config);
        refiner.refine(&mut graph, &excluded, workspace, force, cancel)
    }
}
