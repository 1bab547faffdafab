mod lookup;

pub use lookup::LookupTree;
