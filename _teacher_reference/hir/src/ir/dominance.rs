mod frontier;
mod info;
pub mod nca;
mod traits;
mod tree;

pub use self::{
    frontier::DominanceFrontier,
    info::{DominanceInfo, PostDominanceInfo, RegionDominanceInfo},
    traits::{Dominates, PostDominates},
    tree::{
        DomTreeBase, DomTreeError, DomTreeNode, DomTreeVerificationLevel, DominanceTree,
        PostDominanceTree, PostOrderDomTreeIter, PreOrderDomTreeIter,
    },
};
use self::{
    nca::{BatchUpdateInfo, SemiNCA},
    tree::DomTreeRoots,
};
