pub mod error;
pub mod filter;
pub mod pagination;
pub mod parameters;
pub mod sort;

pub use error::{FilterError, Result};
pub use filter::{Filter, FilterTreeBuilder, FromQueryFilterCreator, Node, Operator};
pub use pagination::{FullPaginator, Pagination, PartialPaginator, WholeResultPaginator};
pub use sort::{Sort, SortDirection};
