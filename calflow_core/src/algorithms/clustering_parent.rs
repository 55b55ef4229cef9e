use tracing::debug;

use crate::algorithm::{Algorithm, AlgorithmFactory};
use crate::context::EventContext;
use crate::error::{PfError, PfResult};
use crate::list_store::AlgorithmId;
use crate::settings::read_if_present;
use calflow_env::AlgorithmConfig;

/// Runs a clustering daughter into a fresh list, optionally associates
/// tracks, then saves the result under a permanent name.
///
/// Daughters: `Clustering` (required), `Association` (optional).
/// Keys: `ClusterListName` (default "PrimaryClusters"),
/// `ReplaceCurrentList` (default true).
pub struct ClusteringParent {
    clustering: Option<Box<dyn Algorithm>>,
    association: Option<Box<dyn Algorithm>>,
    list_name: String,
    replace_current: bool,
}

impl Default for ClusteringParent {
    fn default() -> Self {
        Self {
            clustering: None,
            association: None,
            list_name: "PrimaryClusters".to_string(),
            replace_current: true,
        }
    }
}

impl ClusteringParent {
    pub fn new(clustering: Box<dyn Algorithm>, association: Option<Box<dyn Algorithm>>, list_name: &str) -> Self {
        Self {
            clustering: Some(clustering),
            association,
            list_name: list_name.to_string(),
            replace_current: true,
        }
    }

    pub fn list_name(&self) -> &str {
        &self.list_name
    }
}

impl Algorithm for ClusteringParent {
    fn type_name(&self) -> &str {
        "ClusteringParent"
    }

    fn read_settings(&mut self, config: &AlgorithmConfig, factory: &AlgorithmFactory) -> PfResult<()> {
        self.clustering = Some(factory.create_daughter(config, "Clustering")?);
        self.association = factory.create_optional_daughter(config, "Association")?;
        read_if_present(config, "ClusterListName", &mut self.list_name)?;
        read_if_present(config, "ReplaceCurrentList", &mut self.replace_current)?;
        Ok(())
    }

    fn run(&mut self, ctx: &mut EventContext, id: AlgorithmId) -> PfResult<()> {
        let clustering = self
            .clustering
            .as_mut()
            .ok_or_else(|| PfError::not_initialized("ClusteringParent has no clustering daughter"))?;
        let temp = ctx.run_clustering_algorithm(id, clustering.as_mut())?;
        if let Some(association) = self.association.as_mut() {
            ctx.run_algorithm(association.as_mut())?;
        }

        let n_clusters = ctx.cluster_lists().list(&temp)?.len();
        ctx.save_cluster_list(id, &self.list_name, &temp, None)?;
        if self.replace_current {
            ctx.replace_current_cluster_list(id, &self.list_name)?;
        }
        debug!(list = %self.list_name, n_clusters, "saved clusters");
        Ok(())
    }
}
