//! Orders pipelines so that every producer precedes its consumers.
//!
//! A pipeline consumes another when one of its `pfs` inputs names the other
//! pipeline's output repository. Placement is a post-order depth-first walk
//! over a name index; roots are taken in input order, which decides the
//! relative order of independent pipelines.

use std::collections::BTreeMap;

use metavault_types::pps::PipelineInfo;

use crate::error::{AdminError, Result};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Pending,
    Visiting,
    Placed,
}

struct Walk<'a> {
    pipelines: &'a [PipelineInfo],
    by_name: BTreeMap<&'a str, usize>,
    marks: Vec<Mark>,
    path: Vec<usize>,
    order: Vec<usize>,
}

impl Walk<'_> {
    fn place(&mut self, i: usize) -> Result<()> {
        match self.marks[i] {
            Mark::Placed => return Ok(()),
            Mark::Visiting => {
                let start = self.path.iter().position(|&p| p == i).unwrap_or(0);
                let mut cycle: Vec<String> = self.path[start..]
                    .iter()
                    .map(|&p| self.pipelines[p].pipeline.name.clone())
                    .collect();
                cycle.push(self.pipelines[i].pipeline.name.clone());
                return Err(AdminError::ProvenanceCycle { cycle });
            }
            Mark::Pending => {}
        }
        self.marks[i] = Mark::Visiting;
        self.path.push(i);
        let pipelines = self.pipelines;
        for repo in pipelines[i].input_repos() {
            if let Some(&upstream) = self.by_name.get(repo) {
                self.place(upstream)?;
            }
        }
        self.path.pop();
        self.marks[i] = Mark::Placed;
        self.order.push(i);
        Ok(())
    }
}

/// Sort `pipelines` into provenance order.
///
/// # Errors
///
/// Returns [`AdminError::ProvenanceCycle`] if pipelines consume each
/// other's outputs in a loop.
pub fn sort_pipelines(pipelines: Vec<PipelineInfo>) -> Result<Vec<PipelineInfo>> {
    let order = {
        let mut walk = Walk {
            pipelines: &pipelines,
            by_name: pipelines
                .iter()
                .enumerate()
                .map(|(i, p)| (p.pipeline.name.as_str(), i))
                .collect(),
            marks: vec![Mark::Pending; pipelines.len()],
            path: Vec::new(),
            order: Vec::with_capacity(pipelines.len()),
        };
        for i in 0..pipelines.len() {
            walk.place(i)?;
        }
        walk.order
    };

    let mut slots: Vec<Option<PipelineInfo>> = pipelines.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}
