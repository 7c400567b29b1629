/*!

This is the long-form manual for `precinct_returns` and `prload`.

## Result files

Results are organized in numbered directories, one per election. Each
directory holds one file per contest, named after the contest id
(`9.csv`, `12.xlsx`). Files with a non-numeric name are ignored.
Both CSV files and Excel workbooks (first worksheet, header on the first
row) are accepted.

The election itself is described in a metadata file:

```json
{
  "210": {
    "year": 2019,
    "date": "2/26/2019",
    "label": "2019 Municipal General",
    "races": { "9": "Mayor", "10": "Treasurer" }
  }
}
```

Directories missing from the metadata are skipped.

### Turnout files

A file with both a `registered` and a `turnout` column is a turnout file.
It must also have a `ballots` column. Each precinct gives two records:

| option_name  | option_votes | option_percent |
|--------------|--------------|----------------|
| `registered` | `registered` | null           |
| `ballots`    | `ballots`    | `turnout`      |

### Option files

Any other file has one column per candidate (or ballot question answer).
The columns `precinct_id`, `ward`, `precinct`, `total`, `registered`,
`ballots` and `turnout` are never options, and neither are the identifier
columns (`PRECINCT_ID`, `ID`, `WARD`, `PRECINCT`) nor any column whose name
ends with `Percent`. A column named `<option> Percent` holds the percentage
of `<option>`; options without such a column get 0.0.
The `total` column, when present, becomes the `total_votes` of every record.

A file without any option column is skipped.

### Numbers

Vote counts are read from the first run of digits in the cell, so that
`57 (amended)` reads as 57. Percentages are read from the first
`digits[.digits]` run. Empty cells are 0.

## Precinct identifiers

The canonical identifier of a precinct is its ward on two digits followed by
its precinct number on three digits: ward 1, precinct 1 is `01001`.

The identifier is taken from the first of these columns present in the file:
`precinct_id`, `PRECINCT_ID`, `precinct`, `PRECINCT`, `ID`. A `precinct`
column next to a `ward` column is a precinct number, in which case the
identifier is built from the two. Numeric identifiers shorter than five
digits are padded with zeros (`1001` becomes `01001`).

Then, in this order:
1. missing identifiers are replaced with `GEN001`, `GEN002`, ...
2. `0` and `00000` are replaced with `ZERO001`, `ZERO002`, ...
3. only the first row of each identifier is kept.

## Boundary files

Boundaries are GeoJSON feature collections. The identifier is looked up in
the feature properties as above, and the geometry is stored as its GeoJSON
text. Each file is imported for a range of years:

```json
{ "filePath": "precincts/2014_precincts.geojson", "validFromYear": 2014, "validToYear": 2021 }
```

A missing `validToYear` means that the boundaries are still current.
Importing a file replaces every boundary starting the same year. An import
that would give a precinct two versions valid the same year is rejected.

## Sequences

Result ids and boundary ids come from the `sequence_values` table
(`result_id` and `precinct_geometry_id`). They survive restarts. Resetting a
sequence also deletes the rows using it.
*/
